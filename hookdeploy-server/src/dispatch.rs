use std::collections::HashMap;

use hookdeploy::{DeploymentTarget, ExecutionOutcome, Route, VerificationPolicy, VerificationResult};
use log::{debug, info, warn};

use crate::execute::Executor;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub target: Option<DeploymentTarget>,
    pub policy: VerificationPolicy,
}

/// Immutable mapping from request path to deployment target.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteEntry>,
}

impl RouteTable {
    pub fn build(targets: &[DeploymentTarget], routes: &[Route]) -> Result<Self, RouteTableError> {
        let mut by_name = HashMap::new();
        for target in targets {
            if by_name.insert(target.name.as_str(), target).is_some() {
                return Err(RouteTableError::DuplicateTarget(target.name.clone()));
            }
        }
        let mut table = HashMap::new();
        for Route {
            path,
            target,
            verification,
        } in routes
        {
            if !path.starts_with('/') {
                return Err(RouteTableError::RelativePath(path.clone()));
            }
            let target = match target {
                Some(name) => Some(
                    by_name
                        .get(name.as_str())
                        .map(|target| (*target).clone())
                        .ok_or_else(|| RouteTableError::UnknownTarget {
                            path: path.clone(),
                            target: name.clone(),
                        })?,
                ),
                None => None,
            };
            let requires_verification = target
                .as_ref()
                .map(|target| target.verification_required)
                .unwrap_or(false);
            // A route without a policy follows its target's flag.
            let policy = match *verification {
                Some(policy) => policy,
                None if target.is_some() && !requires_verification => VerificationPolicy::None,
                None => VerificationPolicy::Required,
            };
            if policy == VerificationPolicy::None && requires_verification {
                return Err(RouteTableError::WeakenedVerification(path.clone()));
            }
            let entry = RouteEntry { target, policy };
            if table.insert(path.clone(), entry).is_some() {
                return Err(RouteTableError::DuplicateRoute(path.clone()));
            }
        }
        Ok(RouteTable { routes: table })
    }

    pub fn get(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.get(path)
    }

    /// Paths of routes that dispatch without a signature.
    pub fn unauthenticated(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, entry)| entry.policy == VerificationPolicy::None)
            .map(|(path, _)| path.as_str())
            .collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, PartialEq)]
pub enum RouteTableError {
    DuplicateTarget(String),
    DuplicateRoute(String),
    RelativePath(String),
    UnknownTarget { path: String, target: String },
    WeakenedVerification(String),
}

impl std::fmt::Display for RouteTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::DuplicateTarget(name) => write!(f, "target defined twice: {}", name),
            Self::DuplicateRoute(path) => write!(f, "route defined twice: {}", path),
            Self::RelativePath(path) => write!(f, "route path must start with '/': {}", path),
            Self::UnknownTarget { path, target } => {
                write!(f, "route {} references unknown target: {}", path, target)
            }
            Self::WeakenedVerification(path) => write!(
                f,
                "route {} disables verification for a target that requires it",
                path
            ),
        }
    }
}

impl std::error::Error for RouteTableError {}

/// Terminal decision for one request.
#[derive(Debug)]
pub enum Directive {
    /// The request was accepted, holds the pipeline started for it if any
    Accepted(Option<tokio::task::JoinHandle<Vec<ExecutionOutcome>>>),
    Forbidden,
    NotFound,
}

#[derive(Clone)]
pub struct Dispatcher {
    table: std::sync::Arc<RouteTable>,
    executor: Executor,
}

impl Dispatcher {
    pub fn new(table: RouteTable, executor: Executor) -> Self {
        Dispatcher {
            table: std::sync::Arc::new(table),
            executor,
        }
    }

    /// Verification policy of a route, `None` when the route is unknown.
    pub fn policy(&self, route_key: &str) -> Option<VerificationPolicy> {
        self.table.get(route_key).map(|entry| entry.policy)
    }

    pub fn dispatch(&self, route_key: &str, verification: &VerificationResult) -> Directive {
        let entry = match self.table.get(route_key) {
            Some(entry) => entry,
            None => {
                debug!("No route for {}", route_key);
                return Directive::NotFound;
            }
        };
        if entry.policy == VerificationPolicy::Required && !verification.ok {
            warn!(
                "Rejected request to {}: {}",
                route_key,
                verification.reason.as_deref().unwrap_or("verification failed")
            );
            return Directive::Forbidden;
        }
        match &entry.target {
            Some(target) => {
                info!("Dispatching {} to {}", route_key, target.name);
                Directive::Accepted(Some(self.executor.launch(target.clone())))
            }
            None => {
                info!("Accepted {}, no target mapped", route_key);
                Directive::Accepted(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{target, ScriptedRunner};

    fn route(path: &str, target: Option<&str>, verification: Option<VerificationPolicy>) -> Route {
        Route {
            path: path.to_string(),
            target: target.map(String::from),
            verification,
        }
    }

    fn table() -> RouteTable {
        RouteTable::build(
            &[target("portfolio", true), target("recommend", false)],
            &[
                route("/portfolio-token", Some("portfolio"), None),
                route("/recommend-token", Some("recommend"), None),
                route("/sampleprj", None, Some(VerificationPolicy::None)),
            ],
        )
        .unwrap()
    }

    fn dispatcher(runner: &ScriptedRunner) -> Dispatcher {
        let executor = Executor::new("/srv", Arc::new(runner.clone()), None);
        Dispatcher::new(table(), executor)
    }

    #[test]
    fn policy_defaults_to_required() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get("/portfolio-token").unwrap().policy,
            VerificationPolicy::Required
        );
        assert_eq!(table.unauthenticated(), vec!["/sampleprj"]);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = RouteTable::build(&[], &[route("/x", Some("missing"), None)]).unwrap_err();
        assert_eq!(
            err,
            RouteTableError::UnknownTarget {
                path: String::from("/x"),
                target: String::from("missing"),
            }
        );
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let routes = [route("/x", None, None), route("/x", None, None)];
        let err = RouteTable::build(&[], &routes).unwrap_err();
        assert_eq!(err, RouteTableError::DuplicateRoute(String::from("/x")));
    }

    #[test]
    fn verification_cannot_be_disabled_for_protected_target() {
        let routes = [route(
            "/portfolio",
            Some("portfolio"),
            Some(VerificationPolicy::None),
        )];
        let err = RouteTable::build(&[target("portfolio", true)], &routes).unwrap_err();
        assert_eq!(
            err,
            RouteTableError::WeakenedVerification(String::from("/portfolio"))
        );
    }

    #[test]
    fn unprotected_target_defaults_to_no_verification() {
        let mut open = target("open", false);
        open.verification_required = false;
        let table = RouteTable::build(
            &[open, target("portfolio", true)],
            &[
                route("/open-token", Some("open"), None),
                route("/open-signed", Some("open"), Some(VerificationPolicy::Required)),
                route("/portfolio-token", Some("portfolio"), None),
            ],
        )
        .unwrap();
        assert_eq!(
            table.get("/open-token").unwrap().policy,
            VerificationPolicy::None
        );
        assert_eq!(
            table.get("/open-signed").unwrap().policy,
            VerificationPolicy::Required
        );
        assert_eq!(table.unauthenticated(), vec!["/open-token"]);
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = RouteTable::build(&[], &[route("sampleprj", None, None)]).unwrap_err();
        assert_eq!(err, RouteTableError::RelativePath(String::from("sampleprj")));
    }

    #[tokio::test]
    async fn unknown_route_has_no_side_effect() {
        let runner = ScriptedRunner::default();
        let directive = dispatcher(&runner).dispatch("/nope", &VerificationResult::success());
        assert!(matches!(directive, Directive::NotFound));
        tokio::task::yield_now().await;
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_verification_is_forbidden() {
        let runner = ScriptedRunner::default();
        let directive = dispatcher(&runner).dispatch(
            "/portfolio-token",
            &VerificationResult::failure("digest mismatch"),
        );
        assert!(matches!(directive, Directive::Forbidden));
        tokio::task::yield_now().await;
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn verified_route_launches_pipeline() {
        let runner = ScriptedRunner::default();
        let directive =
            dispatcher(&runner).dispatch("/portfolio-token", &VerificationResult::success());
        let outcomes = match directive {
            Directive::Accepted(Some(pipeline)) => pipeline.await.unwrap(),
            other => panic!("unexpected directive: {:?}", other),
        };
        assert_eq!(outcomes.len(), 3);
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn unauthenticated_route_without_target_is_a_no_op() {
        let runner = ScriptedRunner::default();
        let directive = dispatcher(&runner).dispatch("/sampleprj", &VerificationResult::skipped());
        assert!(matches!(directive, Directive::Accepted(None)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unauthenticated_route_ignores_failed_verification() {
        let runner = ScriptedRunner::default();
        let directive =
            dispatcher(&runner).dispatch("/sampleprj", &VerificationResult::failure("empty body"));
        assert!(matches!(directive, Directive::Accepted(None)));
    }
}
