use hookdeploy::VerificationResult;
use subtle::ConstantTimeEq;

/// Checks request bodies against the signature sent by the source host.
#[derive(Clone)]
pub struct Verifier {
    secret: Vec<u8>,
}

impl Verifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Verifier {
            secret: secret.into(),
        }
    }

    /// Verifies `provided` against the HMAC-SHA256 of `raw_body`.
    ///
    /// Never fails: malformed or missing input yields a negative result. The
    /// reason of a digest mismatch carries both digests, never the secret.
    pub fn verify(&self, raw_body: &[u8], provided: Option<&str>) -> VerificationResult {
        if raw_body.is_empty() {
            return VerificationResult::failure("empty body");
        }
        let provided = provided.unwrap_or_default();
        let expected = hookdeploy::signature(&self.secret, raw_body);
        if digests_match(expected.as_bytes(), provided.as_bytes()) {
            VerificationResult::success()
        } else {
            VerificationResult::failure(format!(
                "Request body digest ({}) did not match {} ({})",
                expected,
                hookdeploy::SIGNATURE_HEADER,
                provided
            ))
        }
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Verifier").finish_non_exhaustive()
    }
}

// Length differences leak nothing: the expected length is public.
fn digests_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}
