//! Conversions from external infrastructure errors into domain errors.

use portbroker_domain::BrokerError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub BrokerError);

impl From<InfraError> for BrokerError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<BrokerError> for InfraError {
    fn from(value: BrokerError) -> Self {
        InfraError(value)
    }
}

impl From<SqlError> for InfraError {
    fn from(err: SqlError) -> Self {
        use rusqlite::ffi::ErrorCode;

        let broker_err = match err {
            SqlError::SqliteFailure(code, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match code.code {
                    ErrorCode::DatabaseBusy => BrokerError::Database("database is busy".into()),
                    ErrorCode::DatabaseLocked => BrokerError::Database("database is locked".into()),
                    ErrorCode::ConstraintViolation => BrokerError::Database(format!(
                        "constraint violation (code {}): {message}",
                        code.extended_code
                    )),
                    _ => BrokerError::Database(format!(
                        "sqlite failure {:?} (code {}): {message}",
                        code.code, code.extended_code
                    )),
                }
            }
            SqlError::QueryReturnedNoRows => {
                BrokerError::NotFound("no rows returned by query".into())
            }
            SqlError::FromSqlConversionFailure(_, _, cause) => {
                BrokerError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            SqlError::InvalidColumnType(_, _, ty) => {
                BrokerError::Database(format!("invalid column type: {ty}"))
            }
            other => BrokerError::Database(other.to_string()),
        };
        InfraError(broker_err)
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(err: r2d2::Error) -> Self {
        InfraError(BrokerError::Database(format!("connection pool error: {err}")))
    }
}

impl From<HttpError> for InfraError {
    fn from(err: HttpError) -> Self {
        let broker_err = if err.is_timeout() {
            BrokerError::UpstreamSync("request timed out".into())
        } else if err.is_connect() {
            BrokerError::UpstreamSync(format!("connection failed: {err}"))
        } else if err.is_status() {
            BrokerError::UpstreamSync(format!(
                "unexpected status {}",
                err.status().map_or_else(|| "unknown".to_string(), |s| s.to_string())
            ))
        } else {
            BrokerError::UpstreamSync(err.to_string())
        };
        InfraError(broker_err)
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        InfraError(BrokerError::Internal(format!("io error: {err}")))
    }
}

/// Map a blocking-task join failure into the domain error.
pub fn map_join_error(err: tokio::task::JoinError) -> BrokerError {
    if err.is_cancelled() {
        BrokerError::Internal("blocking repository task cancelled".into())
    } else {
        BrokerError::Internal(format!("blocking repository task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: BrokerError = InfraError::from(SqlError::QueryReturnedNoRows).into();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[test]
    fn io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BrokerError = InfraError::from(io).into();
        assert!(matches!(err, BrokerError::Internal(_)));
    }
}
