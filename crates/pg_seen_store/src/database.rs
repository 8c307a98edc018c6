use campsite_monitor::StoreError;
use sqlx::{PgPool, Row};
use tracing::info;

/// Creates a connection pool to the PostgreSQL database.
pub async fn create_connection_pool(database_url: &str) -> Result<PgPool, StoreError> {
    PgPool::connect(database_url)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to connect to database: {}", e)))
}

/// Tests the database connection by executing a simple query.
pub async fn test_connection(pool: &PgPool) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT 1 as test")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    let test_value: i32 = row
        .try_get("test")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    info!("✅ Database connection successful! Test value: {}", test_value);

    Ok(())
}
