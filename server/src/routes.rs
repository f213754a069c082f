//! Submit handlers feeding the producer.
//!
//! Authentication happens upstream of this process; handlers trust the
//! `x-user` header the proxy stamps on every request. A 202 means the
//! broker accepted the entry, nothing more. Outcomes are read back from
//! the account store out-of-band.

use std::sync::Arc;

use axum::{
    extract::State as AppState,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use pipeline::model::{
    ClusterDeployment, ClusterRequest, ClusterSpec, ClusterWorkload, VmDeployment, VmRequest,
    VmSpec, VmWorkload,
};

use crate::{error::AppError, state::State};

const USER_HEADER: &str = "x-user";

fn owner_from(headers: &HeaderMap) -> Result<String, AppError> {
    let owner = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if owner.is_empty() {
        return Err(AppError::Unauthenticated);
    }
    Ok(owner.to_string())
}

fn check_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.len() > 63 {
        return Err(AppError::MalformedPayload);
    }
    Ok(())
}

pub async fn submit_vm_handler(
    AppState(state): AppState<Arc<State>>,
    headers: HeaderMap,
    Json(spec): Json<VmSpec>,
) -> Result<impl IntoResponse, AppError> {
    let owner = owner_from(&headers)?;
    check_name(&spec.name)?;

    let id = state
        .producer
        .submit_vm_request(VmRequest {
            owner,
            spec,
            submitted_at: Utc::now(),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, id))
}

pub async fn submit_cluster_handler(
    AppState(state): AppState<Arc<State>>,
    headers: HeaderMap,
    Json(spec): Json<ClusterSpec>,
) -> Result<impl IntoResponse, AppError> {
    let owner = owner_from(&headers)?;
    check_name(&spec.name)?;

    let id = state
        .producer
        .submit_cluster_request(ClusterRequest {
            owner,
            spec,
            submitted_at: Utc::now(),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, id))
}

#[derive(Deserialize)]
pub struct VmDeploymentBody {
    pub request_id: String,
    pub workload: VmWorkload,
}

/// Direct deployment submission, for re-applying an already validated
/// workload.
pub async fn submit_vm_deployment_handler(
    AppState(state): AppState<Arc<State>>,
    headers: HeaderMap,
    Json(body): Json<VmDeploymentBody>,
) -> Result<impl IntoResponse, AppError> {
    let owner = owner_from(&headers)?;
    check_name(&body.workload.name)?;

    let id = state
        .producer
        .submit_vm_deployment(VmDeployment {
            owner,
            request_id: body.request_id,
            workload: body.workload,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, id))
}

#[derive(Deserialize)]
pub struct ClusterDeploymentBody {
    pub request_id: String,
    pub workload: ClusterWorkload,
}

pub async fn submit_cluster_deployment_handler(
    AppState(state): AppState<Arc<State>>,
    headers: HeaderMap,
    Json(body): Json<ClusterDeploymentBody>,
) -> Result<impl IntoResponse, AppError> {
    let owner = owner_from(&headers)?;
    check_name(&body.workload.master.name)?;

    let id = state
        .producer
        .submit_cluster_deployment(ClusterDeployment {
            owner,
            request_id: body.request_id,
            workload: body.workload,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_header_is_unauthenticated() {
        let headers = HeaderMap::new();
        assert!(matches!(
            owner_from(&headers),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn user_header_is_taken_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "u1".parse().unwrap());
        assert_eq!(owner_from(&headers).unwrap(), "u1");
    }

    #[test]
    fn workload_names_are_bounded() {
        assert!(check_name("vm-a").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name(&"x".repeat(64)).is_err());
    }
}
