use std::fmt;
use zeroize::Zeroizing;

/// Outcome of auditing one service's cloud value against its materialized copy.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub service_name: String,
    pub matches: bool,
    pub cloud_length: usize,
    pub cluster_length: usize,
    /// Set only when the stack configuration copy was also checked.
    pub stack_matches: Option<bool>,
    /// Raw values; populated only on an explicit reveal request.
    pub revealed: Option<RevealedValues>,
}

/// Plaintext values returned by a reveal request.
#[derive(Clone)]
pub struct RevealedValues {
    pub cloud: Zeroizing<String>,
    pub cluster: Zeroizing<String>,
    pub stack: Option<Zeroizing<String>>,
}

impl fmt::Debug for RevealedValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealedValues")
            .field("cloud", &"<redacted>")
            .field("cluster", &"<redacted>")
            .field("stack", &self.stack.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
