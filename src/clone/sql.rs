//! Statements issued by the clone workflow and the records they return

use reclone_core_interface::{Endpoint, Row};
use serde::Serialize;

pub const PLUGIN_STATUS: &str =
    "SELECT PLUGIN_STATUS FROM INFORMATION_SCHEMA.PLUGINS WHERE PLUGIN_NAME = 'clone'";

pub const CONNECTION_ID: &str = "SELECT CONNECTION_ID() AS ID";

pub const PROCESSLIST: &str =
    "SELECT ID, USER, HOST, DB, COMMAND, TIME, STATE, INFO FROM INFORMATION_SCHEMA.PROCESSLIST";

pub const DATADIR: &str = "SELECT @@datadir AS DATADIR";

/// `clone_progress` exposes ESTIMATE/DATA; aliased to the work counters they represent
pub const CLONE_PROGRESS: &str = "SELECT STAGE, STATE, ESTIMATE AS WORK_ESTIMATED, DATA AS WORK_COMPLETED \
     FROM performance_schema.clone_progress";

pub const CLONE_STATUS: &str = "SELECT STATE, ERROR_NO, ERROR_MESSAGE, SOURCE, DESTINATION, \
     CAST(BEGIN_TIME AS CHAR) AS BEGIN_TIME, CAST(END_TIME AS CHAR) AS END_TIME \
     FROM performance_schema.clone_status";

pub const SERVER_IDENTITY: &str =
    "SELECT @@version AS VERSION, @@server_id AS SERVER_ID, @@server_uuid AS SERVER_UUID";

/// Quote a string literal for MySQL by doubling single quotes.
///
/// Only valid for text where [`is_quotable`] holds; a backslash means
/// different things depending on `NO_BACKSLASH_ESCAPES`.
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Whether `raw` reads the same in a quoted literal under every `sql_mode`
pub fn is_quotable(raw: &str) -> bool {
    !raw.contains(['\\', '\0'])
}

/// `SET GLOBAL clone_valid_donor_list = 'host:port'`
pub fn set_donor_list(donor: &Endpoint) -> String {
    format!(
        "SET GLOBAL clone_valid_donor_list = {}",
        quote_literal(&donor.address())
    )
}

/// `CLONE INSTANCE FROM 'user'@'host':port IDENTIFIED BY 'password'`
pub fn clone_instance(donor: &Endpoint) -> String {
    clone_instance_with_password(donor, donor.password())
}

/// The clone directive with the password masked, for logs
pub fn clone_instance_redacted(donor: &Endpoint) -> String {
    clone_instance_with_password(donor, "***")
}

fn clone_instance_with_password(donor: &Endpoint, password: &str) -> String {
    format!(
        "CLONE INSTANCE FROM {}@{}:{} IDENTIFIED BY {}",
        quote_literal(&donor.user),
        quote_literal(&donor.host),
        donor.port,
        quote_literal(password)
    )
}

/// One row of `performance_schema.clone_progress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub stage: String,
    pub state: String,
    pub work_estimated: u64,
    pub work_completed: u64,
}

impl ProgressRow {
    pub fn from_row(row: &Row) -> Self {
        Self {
            stage: row.get_string("STAGE").unwrap_or_default(),
            state: row.get_string("STATE").unwrap_or_default(),
            work_estimated: row.get_u64("WORK_ESTIMATED").unwrap_or(0),
            work_completed: row.get_u64("WORK_COMPLETED").unwrap_or(0),
        }
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("STAGE", self.stage.as_str())
            .with("STATE", self.state.as_str())
            .with("WORK_ESTIMATED", self.work_estimated)
            .with("WORK_COMPLETED", self.work_completed)
    }
}

/// The single row of `performance_schema.clone_status`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatusRecord {
    pub state: String,
    pub error_no: i64,
    pub error_message: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub begin_time: Option<String>,
    pub end_time: Option<String>,
}

impl StatusRecord {
    pub fn new(state: impl Into<String>, error_no: i64) -> Self {
        Self {
            state: state.into(),
            error_no,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            state: row.get_string("STATE").unwrap_or_default(),
            error_no: row.get_i64("ERROR_NO").unwrap_or(0),
            error_message: row.get_string("ERROR_MESSAGE").filter(|m| !m.is_empty()),
            source: row.get_string("SOURCE").filter(|s| !s.is_empty()),
            destination: row.get_string("DESTINATION").filter(|s| !s.is_empty()),
            begin_time: row.get_string("BEGIN_TIME"),
            end_time: row.get_string("END_TIME"),
        }
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("STATE", self.state.as_str())
            .with("ERROR_NO", self.error_no)
            .with("ERROR_MESSAGE", self.error_message.clone())
            .with("SOURCE", self.source.clone())
            .with("DESTINATION", self.destination.clone())
            .with("BEGIN_TIME", self.begin_time.clone())
            .with("END_TIME", self.end_time.clone())
    }

    pub fn is_completed(&self) -> bool {
        self.state.eq_ignore_ascii_case("Completed")
    }

    pub fn is_failed(&self) -> bool {
        self.state.eq_ignore_ascii_case("Failed")
    }

    /// States in which the clone has not reached an outcome yet
    pub fn is_intermediate(&self) -> bool {
        self.state.eq_ignore_ascii_case("Not Started")
            || self.state.eq_ignore_ascii_case("In Progress")
    }

    /// Failure text, falling back to the error number
    pub fn failure_message(&self) -> String {
        match &self.error_message {
            Some(message) => message.clone(),
            None if self.error_no != 0 => format!("error {}", self.error_no),
            None => "Unknown error".to_string(),
        }
    }
}

/// Identity of a server after the clone
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServerIdentity {
    pub version: String,
    pub server_id: u64,
    pub server_uuid: String,
}

impl ServerIdentity {
    pub fn from_row(row: &Row) -> Self {
        Self {
            version: row.get_string("VERSION").unwrap_or_default(),
            server_id: row.get_u64("SERVER_ID").unwrap_or(0),
            server_uuid: row.get_string("SERVER_UUID").unwrap_or_default(),
        }
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("VERSION", self.version.as_str())
            .with("SERVER_ID", self.server_id)
            .with("SERVER_UUID", self.server_uuid.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("db-a:33306"), "'db-a:33306'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_backslash_and_nul_are_not_quotable() {
        assert!(is_quotable("s3cr'et"));
        assert!(!is_quotable(r"a\b"));
        assert!(!is_quotable(r"x\'; DROP TABLE t; --"));
        assert!(!is_quotable("nul\0byte"));
    }

    #[test]
    fn test_clone_statements() {
        let donor = Endpoint::new("db-a", 33306, "clone_user", "s3cr'et");
        assert_eq!(
            set_donor_list(&donor),
            "SET GLOBAL clone_valid_donor_list = 'db-a:33306'"
        );
        assert_eq!(
            clone_instance(&donor),
            "CLONE INSTANCE FROM 'clone_user'@'db-a':33306 IDENTIFIED BY 's3cr''et'"
        );
        let redacted = clone_instance_redacted(&donor);
        assert!(!redacted.contains("s3cr"));
        assert!(redacted.ends_with("IDENTIFIED BY '***'"));
    }

    #[test]
    fn test_status_record_classification() {
        assert!(StatusRecord::new("Completed", 0).is_completed());
        assert!(StatusRecord::new("Failed", 3862).is_failed());
        assert!(StatusRecord::new("In Progress", 0).is_intermediate());
        assert!(StatusRecord::new("Not Started", 0).is_intermediate());
        assert!(!StatusRecord::new("Completed", 0).is_intermediate());
    }

    #[test]
    fn test_status_record_round_trip_through_row() {
        let record = StatusRecord::new("Failed", 3862).with_message("donor rejected");
        let parsed = StatusRecord::from_row(&record.to_row());
        assert_eq!(parsed.error_no, 3862);
        assert_eq!(parsed.failure_message(), "donor rejected");
        assert_eq!(
            StatusRecord::new("Failed", 0).failure_message(),
            "Unknown error"
        );
    }

    #[test]
    fn test_progress_row_missing_columns_default_to_zero() {
        let row = Row::new().with("STAGE", "FILE COPY");
        let parsed = ProgressRow::from_row(&row);
        assert_eq!(parsed.work_estimated, 0);
        assert_eq!(parsed.work_completed, 0);
    }
}
