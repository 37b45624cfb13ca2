pub mod controller_runtime;
