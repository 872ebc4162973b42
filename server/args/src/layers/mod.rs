pub use {cli::CliLayer, default::DefaultLayer, env::EnvLayer, file::FileLayer};

mod cli;
mod default;
mod env;
mod file;
