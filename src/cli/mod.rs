mod add;
mod clean;
mod index;
mod prototype;
mod search;
mod show;
mod tag;

pub use add::*;
pub use clean::*;
pub use index::*;
pub use prototype::*;
pub use search::*;
pub use show::*;
pub use tag::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
