use std::collections::BTreeMap;

/// Where captured output lines of a sample end up.
pub trait ResultSink {
    /// Appends one line, prior lines are kept.
    fn append(&mut self, id: usize, text: &str);
    fn clear(&mut self, id: usize);
}

/// DOM id of the result region of sample `index`.
pub fn region_id(index: usize) -> String {
    format!("result-{index}")
}

/// The result regions of a page, keyed by sample index. Only executable samples get one;
/// writes to any other id are ignored.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResultRegions {
    regions: BTreeMap<usize, Vec<String>>,
}

impl ResultRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, id: usize) {
        self.regions.entry(id).or_default();
    }

    pub fn contains(&self, id: usize) -> bool {
        self.regions.contains_key(&id)
    }

    pub fn lines(&self, id: usize) -> Option<&[String]> {
        self.regions.get(&id).map(Vec::as_slice)
    }

    /// The inner HTML of the region, one paragraph per line.
    pub fn render(&self, id: usize) -> String {
        self.lines(id)
            .unwrap_or_default()
            .iter()
            .map(|line| format!("<p>{}</p>", html_escape::encode_text(line)))
            .collect()
    }
}

impl ResultSink for ResultRegions {
    fn append(&mut self, id: usize, text: &str) {
        if let Some(lines) = self.regions.get_mut(&id) {
            lines.push(text.to_string());
        }
    }

    fn clear(&mut self, id: usize) {
        if let Some(lines) = self.regions.get_mut(&id) {
            lines.clear();
        }
    }
}
