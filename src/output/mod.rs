mod styling;
mod summary;
mod tables;

use styling::{label, title};
pub use summary::{print_layers, print_links, print_seed};

/// Prints the `cidag` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        title("🔗 cidag"),
        label(env!("CARGO_PKG_VERSION")),
        label("CI pipeline job graphs and seeding")
    );
}
