use bs58;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid Solana address format: {0}")]
    InvalidSolanaAddress(String),
}

pub fn validate_solana_address(address: &str) -> Result<(), ValidationError> {
    // Check if address is empty
    if address.trim().is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }

    // Decode base58 string
    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return Err(ValidationError::InvalidSolanaAddress(address.to_string())),
    };

    // Validate length (Solana addresses are 32 bytes)
    if decoded.len() != 32 {
        return Err(ValidationError::InvalidSolanaAddress(address.to_string()));
    }

    Ok(())
}
