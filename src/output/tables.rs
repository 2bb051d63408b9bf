use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

/// Green when nothing of the stage was dropped, yellow when some builds were, red when all were.
pub fn color_coded_inclusion_cell(included: usize, total: usize) -> Cell {
    let text = format!("{included}/{total}");
    if included == total {
        Cell::new(text).fg(TableColor::Green)
    } else if included > 0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn deployment_cell(environment: Option<&str>, deploys: bool) -> Cell {
    match (environment, deploys) {
        (Some(name), true) => Cell::new(name).fg(TableColor::Green),
        (Some(name), false) => Cell::new(name).fg(TableColor::Yellow),
        (None, _) => Cell::new("-").fg(TableColor::DarkGrey),
    }
}
