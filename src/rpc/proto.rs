//! Generated prost/tonic types for `proto/scanner.proto`, compiled by `build.rs`.

tonic::include_proto!("scanner");
