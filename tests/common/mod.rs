use qrseal::{AuthEngine, GenerateOptions, Keyring};

/// A generator engine (private half loaded) and a verifier engine built
/// from nothing but the exported public key, which is the distribution
/// model the protocol is designed around.
pub fn engine_pair() -> (AuthEngine, AuthEngine) {
    let generator_keys = Keyring::generate();
    let verifier_keys = Keyring::from_public_pem(
        &generator_keys
            .public_key_pem()
            .expect("public key exports as PEM"),
    )
    .expect("exported public key loads back");
    (
        AuthEngine::new(generator_keys),
        AuthEngine::new(verifier_keys),
    )
}

pub fn options() -> GenerateOptions {
    GenerateOptions::default()
}
