#![allow(dead_code)]

pub mod fakes;
pub mod portal_server;
