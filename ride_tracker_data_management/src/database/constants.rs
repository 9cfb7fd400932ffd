pub const ENTRIES_TABLE_NAME: &str = "Entries";
pub const ENTRY_ID: &str = "entry_id";
pub const OWNER_ID: &str = "owner_id";
pub const KIND: &str = "kind";
pub const AMOUNT: &str = "amount";
pub const DURATION_SECONDS: &str = "duration_seconds";
pub const COST: &str = "cost";
pub const ODOMETER: &str = "odometer";
pub const DESCRIPTION: &str = "description";
pub const CREATED_AT: &str = "created_at";

pub const USERS_TABLE_NAME: &str = "Users";
// Owner id
pub const NAME: &str = "name";
pub const TOKEN_HASH: &str = "token_hash";
// Created at
