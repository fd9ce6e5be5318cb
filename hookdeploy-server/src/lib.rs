pub mod config;
pub mod dispatch;
pub mod execute;
pub mod routes;
pub mod verify;
pub mod views;

#[cfg(test)]
mod testing;

/// State shared by every request handler.
#[derive(Clone)]
pub struct Hooks {
    pub verifier: verify::Verifier,
    pub dispatcher: dispatch::Dispatcher,
    /// Largest request body accepted, in bytes
    pub max_body: u64,
}
