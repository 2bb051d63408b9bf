use std::collections::HashMap;

use indexmap::IndexMap;

/// Ordered CI variables. Later inserts override earlier ones in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    entries: IndexMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn extend(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces `$VAR` and `${VAR}` references. Unknown variables expand to nothing.
    pub fn expand(&self, text: &str) -> String {
        let mut expanded = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(position) = rest.find('$') {
            expanded.push_str(&rest[..position]);
            let after = &rest[position + 1..];

            match parse_reference(after) {
                Some((name, consumed)) => {
                    expanded.push_str(self.get(name).unwrap_or_default());
                    rest = &after[consumed..];
                }
                None => {
                    expanded.push('$');
                    rest = after;
                }
            }
        }

        expanded.push_str(rest);
        expanded
    }

    /// Finds variables that reference each other in a loop.
    ///
    /// Returns the members of the first cycle found, in declaration order.
    /// References to undefined variables are ignored, and so are references
    /// of a variable to itself (`PATH: "$PATH:/bin"` extends the outer value).
    pub fn reference_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let references: HashMap<&str, Vec<&str>> = self
            .entries
            .iter()
            .map(|(key, value)| {
                let names = references_in(value)
                    .into_iter()
                    .filter(|name| *name != key.as_str() && self.entries.contains_key(*name))
                    .collect();
                (key.as_str(), names)
            })
            .collect();

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in self.entries.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }

            let mut path: Vec<&str> = vec![start.as_str()];
            let mut cursors: Vec<usize> = vec![0];
            marks.insert(start.as_str(), Mark::Visiting);

            while let (Some(&node), Some(cursor)) = (path.last(), cursors.last_mut()) {
                let targets = references.get(node).map_or(&[][..], Vec::as_slice);

                if let Some(&next) = targets.get(*cursor) {
                    *cursor += 1;
                    match marks.get(next) {
                        Some(Mark::Visiting) => {
                            let from = path.iter().position(|&name| name == next).unwrap_or(0);
                            let members = &path[from..];
                            let cycle = self
                                .entries
                                .keys()
                                .filter(|key| members.contains(&key.as_str()))
                                .cloned()
                                .collect();
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::Visiting);
                            path.push(next);
                            cursors.push(0);
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    cursors.pop();
                }
            }
        }

        None
    }
}

/// Parses the variable name following a `$`. Returns the name and bytes consumed.
fn parse_reference(after: &str) -> Option<(&str, usize)> {
    if let Some(braced) = after.strip_prefix('{') {
        let end = braced.find('}')?;
        let name = &braced[..end];
        is_variable_name(name).then_some((name, end + 2))
    } else {
        let end = after
            .char_indices()
            .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '_'))
            .map_or(after.len(), |(index, _)| index);
        let name = &after[..end];
        is_variable_name(name).then_some((name, end))
    }
}

pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn references_in(value: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = value;
    while let Some(position) = rest.find('$') {
        let after = &rest[position + 1..];
        match parse_reference(after) {
            Some((name, consumed)) => {
                names.push(name);
                rest = &after[consumed..];
            }
            None => rest = after,
        }
    }
    names
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut variables = Self::new();
        for (key, value) in iter {
            variables.insert(key, value);
        }
        variables
    }
}
