mod application;
mod presentation;

use ata_core::error::Result;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    application::run()
}
