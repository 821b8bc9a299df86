use axum::Router;

/// A portal service mounted by `vidyarthd`.
///
/// Routes carry absolute paths (`/api/videos`, `/link/resolve`) and install
/// their own access guards; the server only adds authentication on top.
/// Modules that run background work (the notification worker) stop it in
/// [`Module::shutdown`].
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn routes(&self) -> Router;

    /// Stop background work. Called once, after the listener has closed.
    fn shutdown(&self) {}
}

/// Stop every module, last mounted first.
pub fn shutdown_all(modules: &[&dyn Module]) {
    for module in modules.iter().rev() {
        module.shutdown();
    }
}
