/// Behaviour of the PACE handshake and the secure channel it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceConfig {
    /// How many times one transmit may be re-issued after a `6C XX` status
    pub max_wrong_length_retries: u8,
    /// Send `84 01 <id>` naming the domain parameters in MSE Set AT
    pub announce_domain_parameters: bool,
    /// Verify the authentication token returned by the card
    pub verify_chip_token: bool,
}

impl PaceConfig {
    /// Create the default configuration
    pub const fn new() -> Self {
        Self {
            max_wrong_length_retries: 2,
            announce_domain_parameters: false,
            verify_chip_token: true,
        }
    }

    /// Set the cap on `6C XX` re-issues
    pub const fn with_max_wrong_length_retries(mut self, retries: u8) -> Self {
        self.max_wrong_length_retries = retries;
        self
    }

    /// Announce the domain parameter id in MSE Set AT
    pub const fn with_announce_domain_parameters(mut self, announce: bool) -> Self {
        self.announce_domain_parameters = announce;
        self
    }

    /// Enable or disable verification of the card's authentication token
    pub const fn with_verify_chip_token(mut self, verify: bool) -> Self {
        self.verify_chip_token = verify;
        self
    }
}

impl Default for PaceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = PaceConfig::default()
            .with_max_wrong_length_retries(0)
            .with_announce_domain_parameters(true)
            .with_verify_chip_token(false);

        assert_eq!(config.max_wrong_length_retries, 0);
        assert!(config.announce_domain_parameters);
        assert!(!config.verify_chip_token);
        assert_eq!(PaceConfig::new().max_wrong_length_retries, 2);
    }
}
