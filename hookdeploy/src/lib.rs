use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
/// Prefix of the signature header value, names the digest algorithm
pub const SIGNATURE_ALGORITHM: &str = "sha256";
/// Header carrying the delivery identifier assigned by the source host
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
/// Header carrying the event name assigned by the source host
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Computes the signature header value for a payload.
///
/// The value has the form `sha256=<lowercase hex hmac>` and is computed over
/// the exact bytes of the payload.
pub fn signature(secret: &[u8], body: &[u8]) -> String {
    // Keys longer than the block size are hashed, shorter ones padded.
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(body);
    format!(
        "{}={}",
        SIGNATURE_ALGORITHM,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DeploymentTarget {
    /// A human readable identifier for the target
    pub name: String,
    /// Working tree of the target, relative to the workspace directory
    pub repository: String,
    /// Branch pulled during the sync stage
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Whether the build stage runs after a successful sync
    pub build_required: bool,
    /// Whether routes bound to this target must carry a valid signature
    #[serde(default = "default_true")]
    pub verification_required: bool,
    #[serde(default)]
    pub build: BuildDefinition,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BuildDefinition {
    /// Build directory, relative to the repository root
    #[serde(default = "default_build_dir")]
    pub dir: String,
    /// Commands run in order inside the build directory
    #[serde(default = "default_build_commands")]
    pub commands: Vec<StageCommand>,
}

impl Default for BuildDefinition {
    fn default() -> Self {
        BuildDefinition {
            dir: default_build_dir(),
            commands: default_build_commands(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StageCommand {
    /// Command to run
    pub cmd: String,
    /// Arguments passed to the command
    #[serde(default)]
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new(cmd: &str, args: &[&str]) -> Self {
        StageCommand {
            cmd: cmd.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for StageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.cmd)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    Required,
    /// Explicit opt-out, the route dispatches unauthenticated requests
    None,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Route {
    /// Request path, including the leading slash
    pub path: String,
    /// Name of the target deployed by this route, a route without target is a no-op
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub verification: Option<VerificationPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn success() -> Self {
        VerificationResult {
            ok: true,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        VerificationResult {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    /// Result used for routes that opted out of verification.
    pub fn skipped() -> Self {
        VerificationResult {
            ok: true,
            reason: Some(String::from("verification not required")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Stage {
    Sync,
    Build,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Stage::Sync => write!(f, "SYNC"),
            Stage::Build => write!(f, "BUILD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionOutcome {
    pub stage: Stage,
    /// Command line that produced this outcome
    pub command: String,
    pub succeeded: bool,
    /// Captured standard output
    pub output: String,
    pub error: Option<String>,
}

fn default_branch() -> String {
    String::from("master")
}

fn default_true() -> bool {
    true
}

fn default_build_dir() -> String {
    String::from("client")
}

fn default_build_commands() -> Vec<StageCommand> {
    vec![
        StageCommand::new("npm", &["install"]),
        StageCommand::new("npm", &["run", "build"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        // RFC 4231 test case 2
        let signature = signature(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_depends_on_secret() {
        assert_ne!(signature(b"one", b"{}"), signature(b"two", b"{}"));
    }

    #[test]
    fn signature_accepts_any_key_length() {
        let long_key = [0x0b; 200];
        for key in [&b""[..], &b"k"[..], &long_key[..]] {
            let signature = signature(key, b"payload");
            assert!(signature.starts_with("sha256="));
            assert_eq!(signature.len(), "sha256=".len() + 64);
        }
    }

    #[test]
    fn target_defaults_are_applied() {
        let target: DeploymentTarget = serde_json::from_str(
            r#"{"name": "portfolio", "repository": "portfolio-v2", "build_required": true}"#,
        )
        .unwrap();
        assert_eq!(target.branch, "master");
        assert!(target.verification_required);
        assert_eq!(target.build.dir, "client");
        assert_eq!(target.build.commands.len(), 2);
        assert_eq!(target.build.commands[1].to_string(), "npm run build");
    }

    #[test]
    fn route_policy_parses_lowercase() {
        let route: Route =
            serde_json::from_str(r#"{"path": "/sampleprj", "verification": "none"}"#).unwrap();
        assert_eq!(route.verification, Some(VerificationPolicy::None));
        assert!(route.target.is_none());
    }
}
