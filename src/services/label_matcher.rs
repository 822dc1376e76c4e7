/// Decides whether a label set contains the pipeline's target label.
///
/// A label matches when it contains the target as a substring
/// (case-sensitive). Labels are checked in order and the first hit wins.
#[derive(Clone, Debug)]
pub struct LabelMatcher {
    target: String,
}

impl LabelMatcher {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the first label containing the target, if any.
    pub fn find_match<'a>(&self, labels: &'a [String]) -> Option<&'a str> {
        labels
            .iter()
            .map(String::as_str)
            .find(|label| label.contains(self.target.as_str()))
    }
}
