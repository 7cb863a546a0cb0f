//! SQL text for the export table.
//!
//! The table name is interpolated into the statements, so it is validated as
//! a plain identifier before it is ever stored or used. Values are formatted
//! with the fixed precisions of the export schema.

use std::fmt::Write;

use indicator_types::{CurrentSnapshot, Quantity, export::TABLE_LEN};

/// Longest table name that fits the persisted layout.
pub const MAX_TABLE_NAME_LEN: usize = TABLE_LEN - 1;

/// Whether `name` is a safe unquoted table identifier.
///
/// ```
/// use indicator_service::sql::is_valid_table_name;
///
/// assert!(is_valid_table_name("sensor_data"));
/// assert!(!is_valid_table_name("data; DROP TABLE x"));
/// ```
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Decimal places a quantity is exported with.
pub fn export_precision(quantity: Quantity) -> usize {
    match quantity {
        Quantity::Co2 | Quantity::Tvoc | Quantity::Pm1 | Quantity::Pm25 | Quantity::Pm10 => 1,
        Quantity::Temperature
        | Quantity::Humidity
        | Quantity::ExternalTemperature
        | Quantity::ExternalHumidity
        | Quantity::No2
        | Quantity::C2h5oh
        | Quantity::Voc
        | Quantity::Co => 2,
    }
}

/// Idempotent DDL creating the export table.
pub fn create_table(table: &str) -> String {
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id INT AUTO_INCREMENT PRIMARY KEY,\
         timestamp BIGINT NOT NULL,\
         received_at DATETIME DEFAULT CURRENT_TIMESTAMP"
    );
    for quantity in Quantity::ALL {
        let _ = write!(sql, ",{} FLOAT", quantity.column());
    }
    sql.push(')');
    sql
}

/// One-row insert of every quantity, stamped with `timestamp`.
pub fn insert_row(table: &str, timestamp: i64, snapshot: &CurrentSnapshot) -> String {
    let mut sql = format!("INSERT INTO {table} (timestamp");
    for quantity in Quantity::ALL {
        let _ = write!(sql, ",{}", quantity.column());
    }
    let _ = write!(sql, ") VALUES ({timestamp}");
    for quantity in Quantity::ALL {
        let _ = write!(
            sql,
            ",{:.prec$}",
            snapshot.value(quantity),
            prec = export_precision(quantity)
        );
    }
    sql.push(')');
    sql
}
