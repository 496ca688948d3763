//! Finalizer handling for RedisFailover resources.
//!
//! The finalizer holds deletion until the owned objects have been removed
//! explicitly.

use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};

use crate::controller::error::Result;
use crate::crd::RedisFailover;

/// Finalizer name for explicit owned-object cleanup
pub const FINALIZER: &str = "databases.spotahome.com/finalizer";

/// Check if the resource carries the operator finalizer.
pub fn has_finalizer(resource: &RedisFailover) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizer list with ours added, or `None` if it is already present.
pub fn with_finalizer(finalizers: &[String]) -> Option<Vec<String>> {
    if finalizers.iter().any(|f| f == FINALIZER) {
        return None;
    }
    let mut updated = finalizers.to_vec();
    updated.push(FINALIZER.to_string());
    Some(updated)
}

/// Finalizer list with ours removed, or `None` if it is absent.
pub fn without_finalizer(finalizers: &[String]) -> Option<Vec<String>> {
    let pos = finalizers.iter().position(|f| f == FINALIZER)?;
    let mut updated = finalizers.to_vec();
    updated.remove(pos);
    Some(updated)
}

async fn patch_finalizers(api: &Api<RedisFailover>, name: &str, finalizers: Vec<String>) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Add the finalizer to a resource.
pub async fn add_finalizer(api: &Api<RedisFailover>, name: &str) -> Result<()> {
    let resource = api.get(name).await?;
    if let Some(finalizers) = with_finalizer(resource.finalizers()) {
        patch_finalizers(api, name, finalizers).await?;
    }
    Ok(())
}

/// Remove the finalizer from a resource.
pub async fn remove_finalizer(api: &Api<RedisFailover>, name: &str) -> Result<()> {
    let resource = match api.get(name).await {
        Ok(r) => r,
        // Already gone
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if let Some(finalizers) = without_finalizer(resource.finalizers()) {
        patch_finalizers(api, name, finalizers).await?;
    }
    Ok(())
}
