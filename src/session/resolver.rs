use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lookup forms tried against the session store, most specific first.
    /// The case-normalized variant keeps a session reachable when a transport
    /// reports the same sender with drifting case.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = vec![self.0.clone()];
        let lowered = self.0.to_ascii_lowercase();
        if lowered != self.0 {
            out.push(lowered);
        }
        out
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives the stable session key for an inbound message.
///
/// The same channel + sender always maps to the same key, so a conversation
/// survives restarts and reconnects.
#[derive(Debug, Default, Clone)]
pub struct SessionKeyResolver;

impl SessionKeyResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, channel_id: &str, sender: &str) -> SessionKey {
        SessionKey::new(format!("direct:{channel_id}:{sender}"))
    }
}

#[cfg(test)]
mod tests {
    use super::SessionKeyResolver;

    #[test]
    fn resolver_is_stable_for_same_channel_and_sender() {
        let resolver = SessionKeyResolver::new();
        let a = resolver.resolve("spixi", "wallet-abc");
        let b = resolver.resolve("spixi", "wallet-abc");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "direct:spixi:wallet-abc");
    }

    #[test]
    fn resolver_separates_channels() {
        let resolver = SessionKeyResolver::new();
        let a = resolver.resolve("spixi", "alice");
        let b = resolver.resolve("telegram", "alice");
        assert_ne!(a, b);
    }

    #[test]
    fn candidates_include_lowercase_variant_only_when_distinct() {
        let resolver = SessionKeyResolver::new();
        let mixed = resolver.resolve("spixi", "Wallet-ABC");
        assert_eq!(
            mixed.candidates(),
            vec![
                "direct:spixi:Wallet-ABC".to_string(),
                "direct:spixi:wallet-abc".to_string()
            ]
        );

        let lower = resolver.resolve("spixi", "wallet-abc");
        assert_eq!(lower.candidates(), vec!["direct:spixi:wallet-abc".to_string()]);
    }
}
