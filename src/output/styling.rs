use console::{style, StyledObject};

/// Styling helpers for terminal output
pub fn title(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

pub fn heading(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().underlined()
}

pub fn label(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn job_name(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn count(value: impl std::fmt::Display) -> StyledObject<String> {
    style(value.to_string()).bright().yellow()
}

pub fn ok(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn failure(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}
