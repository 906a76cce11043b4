use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

use super::protocol::{
    DEFAULT_MESSAGE_LIMIT, DataQueryParams, DataQueryResponse, ErrorResponse,
    RecoveryHttpRequest, ResponseMetadata, StoredStreamPartResponse, StreamMetadataResponse,
};
use crate::broadband::BroadbandPublisher;
use crate::consensus::ConsensusManager;
use crate::error::{ConsensusError, PropagationError};
use crate::ingestion::{StreamPartAssignments, StreamPartId};
use crate::membership::RollCall;
use crate::membership::types::OnlineBrokers;
use crate::propagation::QueryRequestManager;
use crate::protocol::{
    QueryOptions, QueryRef, QueryRequest, QueryType, RecoveryRequest, SystemPayload,
};
use crate::storage::LogStore;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let error = message.into();
    if status.is_server_error() {
        error!("{}", error);
    } else {
        debug!("Rejected request: {}", error);
    }
    (status, Json(ErrorResponse { error })).into_response()
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("Query parameter \"{name}\" not a number: {raw}"))
}

fn optional_number<T: std::str::FromStr>(name: &str, raw: Option<&String>) -> Result<Option<T>, String> {
    raw.map(|value| parse_number(name, value)).transpose()
}

fn required_number<T: std::str::FromStr>(name: &str, raw: Option<&String>) -> Result<T, String> {
    optional_number(name, raw)?.ok_or_else(|| format!("Query parameter \"{name}\" required."))
}

pub fn parse_partition(raw: &str) -> Result<u32, String> {
    raw.parse()
        .map_err(|_| format!("Path parameter \"partition\" not a number: {raw}"))
}

/// Turns an HTTP data query into a protocol request.
///
/// One record more than the response limit is asked for, so the response can tell
/// whether more data exists.
pub fn build_query_request(
    stream_id: &str,
    partition: &str,
    query_type: &str,
    params: &DataQueryParams,
) -> Result<QueryRequest, String> {
    let partition = parse_partition(partition)?;
    let query_type: QueryType = query_type
        .parse()
        .map_err(|_| format!("Unknown query type: {query_type}"))?;
    let limit = DEFAULT_MESSAGE_LIMIT + 1;

    let query_options = match query_type {
        QueryType::Last => {
            let count: u32 = optional_number("count", params.count.as_ref())?.unwrap_or(1);
            QueryOptions::Last {
                last: count.min(limit),
            }
        }
        QueryType::From => QueryOptions::From {
            from: QueryRef {
                timestamp: required_number("fromTimestamp", params.from_timestamp.as_ref())?,
                sequence_number: optional_number(
                    "fromSequenceNumber",
                    params.from_sequence_number.as_ref(),
                )?,
            },
            publisher_id: params.publisher_id.clone(),
            limit: Some(limit),
        },
        QueryType::Range => QueryOptions::Range {
            from: QueryRef {
                timestamp: required_number("fromTimestamp", params.from_timestamp.as_ref())?,
                sequence_number: optional_number(
                    "fromSequenceNumber",
                    params.from_sequence_number.as_ref(),
                )?,
            },
            to: QueryRef {
                timestamp: required_number("toTimestamp", params.to_timestamp.as_ref())?,
                sequence_number: optional_number(
                    "toSequenceNumber",
                    params.to_sequence_number.as_ref(),
                )?,
            },
            publisher_id: params.publisher_id.clone(),
            msg_chain_id: params.msg_chain_id.clone(),
            limit: Some(limit),
        },
    };

    let consumer = params.consumer.as_deref().unwrap_or("anonymous");
    Ok(QueryRequest::new(consumer, stream_id, partition, query_options))
}

pub async fn handle_data_query(
    Path((stream_id, partition, query_type)): Path<(String, String, String)>,
    Query(params): Query<DataQueryParams>,
    Extension(requests): Extension<Arc<QueryRequestManager>>,
) -> Response {
    let request = match build_query_request(&stream_id, &partition, &query_type, &params) {
        Ok(request) => request,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let resolution = match requests
        .publish_query_request_and_wait_for_propagate_resolution(request.clone())
        .await
    {
        Ok(resolution) => resolution,
        Err(PropagationError::Timeout) => {
            return error_response(StatusCode::GATEWAY_TIMEOUT, PropagationError::Timeout.to_string());
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut messages = Vec::new();
    for record in requests.get_data_for_query_request(&request) {
        match record {
            Ok(record) => messages.push(record),
            Err(e) => {
                error!("Query {} failed mid-stream: {}", request.request_id, e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch data!");
            }
        }
    }

    let limit = DEFAULT_MESSAGE_LIMIT as usize;
    let next_timestamp = messages.get(limit).map(|next| next.timestamp());
    messages.truncate(limit);

    (
        StatusCode::OK,
        Json(DataQueryResponse {
            messages,
            metadata: ResponseMetadata {
                participants: resolution.participants,
                has_next: next_timestamp.is_some(),
                next_timestamp,
            },
        }),
    )
        .into_response()
}

pub async fn handle_consensus_query(
    Path((stream_id, partition, query_type)): Path<(String, String, String)>,
    Query(params): Query<DataQueryParams>,
    Extension(consensus): Extension<Arc<ConsensusManager>>,
    Extension(online): Extension<Arc<dyn OnlineBrokers>>,
) -> Response {
    let request = match build_query_request(&stream_id, &partition, &query_type, &params) {
        Ok(request) => request,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let expected_total = online.online_brokers().len();
    match consensus.get_consensus(request, expected_total).await {
        Ok(votes) => (StatusCode::OK, Json(votes)).into_response(),
        Err(e @ ConsensusError::NoConsensus) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e @ ConsensusError::Timeout) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn handle_stream_metadata(
    Path((stream_id, partition)): Path<(String, String)>,
    Extension(log_store): Extension<Arc<LogStore>>,
) -> Response {
    let partition = match parse_partition(&partition) {
        Ok(partition) => partition,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    match log_store.stream_stats(&stream_id, partition) {
        Ok(stats) => (
            StatusCode::OK,
            Json(StreamMetadataResponse {
                total_bytes: stats.total_bytes,
                total_messages: stats.total_messages,
                first_message: stats.first_message,
                last_message: stats.last_message,
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// 200 when this broker is assigned the stream part, 404 otherwise.
pub async fn handle_stored_stream_part(
    Path((stream_id, partition)): Path<(String, String)>,
    Extension(assignments): Extension<Arc<StreamPartAssignments>>,
) -> Response {
    let partition = match parse_partition(&partition) {
        Ok(partition) => partition,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    if !assignments.has_stream_part(&StreamPartId::new(stream_id.clone(), partition)) {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Stream part {stream_id}#{partition} not stored on this node"),
        );
    }

    (
        StatusCode::OK,
        Json(StoredStreamPartResponse {
            stream_id,
            partition,
        }),
    )
        .into_response()
}

/// Publishes a recovery request and answers with the brokers expected to respond.
pub async fn handle_recovery(
    Extension(publisher): Extension<Arc<BroadbandPublisher>>,
    Extension(roll_call): Extension<Arc<RollCall>>,
    Json(req): Json<RecoveryHttpRequest>,
) -> Response {
    let request = RecoveryRequest {
        request_id: req
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        from: req.from,
        to: req.to.unwrap_or(u64::MAX),
    };
    let request_id = request.request_id.clone();

    if let Err(e) = publisher
        .publish(SystemPayload::RecoveryRequest(request))
        .await
    {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to publish recovery request: {e}"),
        );
    }
    debug!("Published recovery request {}", request_id);

    (StatusCode::OK, Json(roll_call.alive_brokers())).into_response()
}
