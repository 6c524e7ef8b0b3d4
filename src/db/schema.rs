//! Sea-query schema for the message archive.

use sea_query::{ColumnDef, Iden, Index, IndexCreateStatement, SqliteQueryBuilder, Table};

/// Archived messages, one row per envelope.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "topic"]
    Topic,
    #[iden = "uuid"]
    Uuid,
    /// Relay timestamp, `YYYY-MM-DD HH:MM:SS.ffffff` UTC.
    #[iden = "datetime"]
    Datetime,
    #[iden = "username"]
    Username,
    /// Payload JSON text.
    #[iden = "data"]
    Data,
}

pub fn create_table() -> String {
    Table::create()
        .table(Messages::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Messages::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(Messages::Topic).text().not_null())
        .col(ColumnDef::new(Messages::Uuid).text().not_null())
        .col(ColumnDef::new(Messages::Datetime).text().not_null())
        .col(ColumnDef::new(Messages::Username).text().not_null())
        .col(ColumnDef::new(Messages::Data).text().not_null())
        .to_string(SqliteQueryBuilder)
}

pub fn create_indexes() -> Vec<String> {
    [
        ("idx_messages_topic", Messages::Topic),
        ("idx_messages_uuid", Messages::Uuid),
        ("idx_messages_datetime", Messages::Datetime),
        ("idx_messages_username", Messages::Username),
    ]
    .into_iter()
    .map(|(name, column)| index(name, column).to_string(SqliteQueryBuilder))
    .collect()
}

fn index(name: &str, column: Messages) -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name(name)
        .table(Messages::Table)
        .col(column)
        .to_owned()
}
