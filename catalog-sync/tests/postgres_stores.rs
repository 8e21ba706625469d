use std::time::Duration;

use catalog_sync::store::postgres::{PgCatalogStore, PgDocumentStore};
use catalog_sync::store::{CatalogStore, DocumentStore, StoreError};
use catalog_sync::types::{DocumentStatusUpdate, ProductQuantityUpdate};
use chrono::{TimeZone, Utc};
use sqlx::PgPool;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn insert_product(db: &PgPool, id: &str, quantity: Option<f64>) {
    sqlx::query(
        "INSERT INTO products (id, name, description, created_at, updated_at, quantity, deleted)
         VALUES ($1, $2, $3, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', $4, false)",
    )
    .bind(id)
    .bind(format!("product {id}"))
    .bind("a product")
    .bind(quantity)
    .execute(db)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "./tests/test_migrations")]
async fn finds_products_by_id(db: PgPool) {
    insert_product(&db, "P1", Some(10.0)).await;
    insert_product(&db, "P2", None).await;
    let store = PgCatalogStore::new(db, TIMEOUT);

    let p1 = store.find_by_id("P1").await.unwrap().unwrap();
    assert_eq!(p1.quantity, Some(10.0));
    assert_eq!(p1.name, "product P1");

    let p2 = store.find_by_id("P2").await.unwrap().unwrap();
    assert_eq!(p2.quantity, None);

    assert!(store.find_by_id("P404").await.unwrap().is_none());
}

#[sqlx::test(migrations = "./tests/test_migrations")]
async fn quantity_update_is_scoped(db: PgPool) {
    insert_product(&db, "P1", Some(10.0)).await;
    let store = PgCatalogStore::new(db.clone(), TIMEOUT);
    let before = store.find_by_id("P1").await.unwrap().unwrap();

    let updated = store
        .update_quantity(ProductQuantityUpdate {
            id: "P1".to_string(),
            quantity: 12.0,
        })
        .await
        .unwrap();

    assert_eq!(updated.quantity, Some(12.0));
    assert_eq!(updated.name, before.name);
    assert_eq!(updated.description, before.description);
    assert_eq!(updated.created_at, before.created_at);
    assert_eq!(
        before.updated_at,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
    assert!(updated.updated_at > before.updated_at);

    // columns the store doesn't even model are left alone too
    let deleted: Option<bool> = sqlx::query_scalar("SELECT deleted FROM products WHERE id = 'P1'")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(deleted, Some(false));
}

#[sqlx::test(migrations = "./tests/test_migrations")]
async fn updating_missing_product_fails(db: PgPool) {
    let store = PgCatalogStore::new(db, TIMEOUT);

    let result = store
        .update_quantity(ProductQuantityUpdate {
            id: "P404".to_string(),
            quantity: 1.0,
        })
        .await;

    assert!(matches!(result, Err(StoreError::Missing(id)) if id == "P404"));
}

#[sqlx::test(migrations = "./tests/test_migrations")]
async fn status_update_is_scoped(db: PgPool) {
    sqlx::query("INSERT INTO documents (id, title, status) VALUES ('D1', 'invoice 42', 'open')")
        .execute(&db)
        .await
        .unwrap();
    let store = PgDocumentStore::new(db, TIMEOUT);

    let updated = store
        .update_status(DocumentStatusUpdate {
            id: "D1".to_string(),
            status: "closed".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(updated.status, "closed");
    assert_eq!(updated.title, "invoice 42");
    assert_eq!(store.find_by_id("D1").await.unwrap().unwrap(), updated);
    assert!(store.find_by_id("D404").await.unwrap().is_none());
}
