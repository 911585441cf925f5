use axum::extract::State;

use crate::{
    AppState,
    api::{extract::Json, models::users::CurrentUser},
    inference::ModelInfo,
};

/// Describe the loaded model
#[utoipa::path(
    get,
    path = "/model",
    tag = "model",
    summary = "Model information",
    responses(
        (status = 200, description = "Version, thresholds and feature schema of the active model", body = ModelInfo),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_model(State(state): State<AppState>, _current_user: CurrentUser) -> Json<ModelInfo> {
    Json(state.engine.describe())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_app, create_test_config, register_and_login};

    #[test_log::test(tokio::test)]
    async fn test_model_info_lists_schema() {
        let server = create_test_app(create_test_config()).await;
        let token = register_and_login(&server, "viewer1", Role::Viewer).await;

        let info: ModelInfo = server.get("/model").authorization_bearer(&token).await.json();
        assert_eq!(info.model_version, "1.0.0");
        assert_eq!(info.risk_thresholds.low, 0.3);
        assert_eq!(info.risk_thresholds.medium, 0.6);
        assert!(info.numerical_features.contains(&"age".to_string()));
        let gender = info.categorical_features.iter().find(|c| c.name == "gender").unwrap();
        assert!(gender.levels.contains(&"Female".to_string()));
    }
}
