use std::{collections::HashSet, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use cohort_common::Node;

/// Receives the provider set of a registered service whenever it changes.
#[async_trait]
pub trait ProvidersListener: Send + Sync + 'static {
    async fn providers_changed(&self, providers: &HashSet<Node>);
}

#[async_trait]
impl<F> ProvidersListener for F
where
    F: Fn(&HashSet<Node>) + Send + Sync + 'static,
{
    async fn providers_changed(&self, providers: &HashSet<Node>) {
        self(providers)
    }
}

/// Invoke a listener, logging instead of propagating a panic
pub(crate) async fn notify<S: std::fmt::Debug>(
    listener: &Arc<dyn ProvidersListener>,
    service: &S,
    providers: &HashSet<Node>,
) {
    let call = AssertUnwindSafe(listener.providers_changed(providers));
    if call.catch_unwind().await.is_err() {
        error!(service = ?service, "Providers listener panicked");
    }
}
