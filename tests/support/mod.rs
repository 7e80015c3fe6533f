#![allow(dead_code)]

pub mod archiver_env;
pub mod files;
