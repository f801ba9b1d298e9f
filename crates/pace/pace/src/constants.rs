//! Instruction bytes, references and data object tags

/// Instruction for MANAGE SECURITY ENVIRONMENT
pub const INS_MSE: u8 = 0x22;
/// Instruction for GENERAL AUTHENTICATE
pub const INS_GENERAL_AUTHENTICATE: u8 = 0x86;
/// MSE: SET for internal/mutual authentication
pub const P1_MSE_SET_AT: u8 = 0xC1;
/// MSE P2 selecting the authentication template
pub const P2_MSE_SET_AT: u8 = 0xA4;
/// Class byte with the command chaining bit set
pub const CLA_CHAINING: u8 = 0x10;

/// Instructions whose plain data may carry a password and is never logged
pub const PASSWORD_INSTRUCTIONS: [u8; 3] = [0x20, 0x24, 0x2C];

/// Data object tags used by MSE Set AT and GENERAL AUTHENTICATE
pub mod tags {
    /// Cryptographic mechanism reference (algorithm OID)
    pub const MECHANISM: u8 = 0x80;
    /// Password reference
    pub const PASSWORD_REFERENCE: u8 = 0x83;
    /// Reference of standardized domain parameters
    pub const DOMAIN_PARAMETERS: u8 = 0x84;
    /// Certificate holder authorization template
    pub const CHAT: &str = "7F4C";

    /// Dynamic authentication data template containing one of the below
    pub const DYNAMIC_AUTHENTICATION_DATA: u8 = 0x7C;
    /// Encrypted nonce (card)
    pub const ENCRYPTED_NONCE: u8 = 0x80;
    /// Mapping data (terminal)
    pub const MAPPING_DATA_TERMINAL: u8 = 0x81;
    /// Mapping data (card)
    pub const MAPPING_DATA_CARD: u8 = 0x82;
    /// Ephemeral public key (terminal)
    pub const EPHEMERAL_KEY_TERMINAL: u8 = 0x83;
    /// Ephemeral public key (card)
    pub const EPHEMERAL_KEY_CARD: u8 = 0x84;
    /// Authentication token (terminal)
    pub const TOKEN_TERMINAL: u8 = 0x85;
    /// Authentication token (card)
    pub const TOKEN_CARD: u8 = 0x86;
    /// Most recent certification authority reference
    pub const CAR: u8 = 0x87;
    /// Previous certification authority reference
    pub const CAR_PREVIOUS: u8 = 0x88;
}
