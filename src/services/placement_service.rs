use std::sync::Arc;

use tracing::info;

use crate::{
    dao::{
        models::{ClassEntity, PlacementRequest},
        trial_store::TrialStore,
    },
    error::ServiceError,
};

/// Ask the remote ranking procedure to recompute the placements of a class.
///
/// The ranking rule follows the show type: nationals shows rank by points,
/// every other show by faults.
pub async fn recalculate_class_placements(
    store: &Arc<dyn TrialStore>,
    class: &ClassEntity,
) -> Result<PlacementRequest, ServiceError> {
    let trial = store
        .find_trial(class.trial_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("trial `{}`", class.trial_id)))?;
    let show = store
        .find_show(trial.show_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("show `{}`", trial.show_id)))?;

    let request = PlacementRequest {
        class_ids: vec![class.id],
        license_key: show.license_key.clone(),
        is_nationals: show.is_nationals(),
    };
    store.recalculate_placements(request.clone()).await?;

    info!(
        class_id = class.id,
        is_nationals = request.is_nationals,
        "placements recalculated"
    );
    Ok(request)
}
