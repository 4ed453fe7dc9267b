mod common;
mod workload;
