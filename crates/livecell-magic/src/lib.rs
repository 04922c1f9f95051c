//! Magic commands for live code cells
//!
//! A magic command is a leading comment line such as `#%autorun` that
//! controls what a cell does on its own the first time it is shown:
//! - `#%autorun` - run once the runtime is ready
//! - `#%collapse` - hide the editor body at first paint
//! - `#%load="<url>"` - splice a template into the cell
//! - `#%copy_console` / `#%send_console` - forward console output to the host input
//!
//! # Example
//!
//! ```rust
//! use livecell_magic::parse;
//!
//! let commands = parse("#%autorun\n#%send_console=\"Result:\"\nprint(42)");
//! assert!(commands.autorun);
//! assert_eq!(
//!     commands.send_console.and_then(|c| c.prompt).as_deref(),
//!     Some("Result:")
//! );
//! ```

#![warn(unreachable_pub)]

pub mod directive;
pub mod load;
pub mod parser;

pub use directive::{ConsoleDirective, ConsoleMode, ConsumedFlags, MagicCommandSet};
pub use load::{annotate_warnings, find_load_line, resolve_url, splice_template, LoadLine, UrlError};
pub use parser::{parse, parse_report, ParseReport, ParseWarning};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
