mod error;
pub mod repl;

use error::Result;
use repl::Repl;

fn main() -> Result<()> {
    tfs::logging::init();
    Repl::new()?.run();
    Ok(())
}
