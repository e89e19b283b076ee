//! PostgreSQL reconciliation tests.
//!
//! Run with `DATABASE_URL` pointing at a server where the test user may
//! create databases: `cargo test -- --ignored`.

use sqlx::PgPool;

use parking_tracker::{
    database::{Database, SpotStore},
    errors::TrackerError,
    models::{LabeledSpot, Location, Lot, SpotId, SpotObservation, SpotStatus},
};

fn obs(id: u8, occupied: bool) -> SpotObservation {
    SpotObservation::new(SpotId::try_from(id).unwrap(), occupied)
}

fn labeled(id: i32, lot: &str) -> LabeledSpot {
    LabeledSpot {
        id,
        image_index: None,
        points: Vec::new(),
        location: Some(Location {
            lat: 60.192059,
            lng: 24.945831,
        }),
        parking_lot_name: lot.to_string(),
    }
}

async fn setup_store(pool: PgPool, ids: &[i32]) -> Database {
    let db = Database::new(pool).await.unwrap();
    db.create_lot(&Lot {
        parking_lot_name: "Lot A".to_string(),
        hours: "24/7".to_string(),
        price: "$2/h".to_string(),
    })
    .await
    .unwrap();

    let spots: Vec<_> = ids.iter().map(|&id| labeled(id, "Lot A")).collect();
    db.replace_all_spots(&spots).await.unwrap();
    db
}

async fn stored_status(pool: &PgPool, id: i32) -> String {
    sqlx::query_scalar("SELECT status FROM spots WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("Failed to retrieve spot status")
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_apply_observations(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 5]).await;

    let updated = db
        .apply_observations(&[obs(5, false), obs(1, true), obs(5, true)])
        .await
        .expect("Failed to apply observations");

    assert_eq!(updated, 2);
    assert_eq!(stored_status(&pool, 5).await, "occupied");
    assert_eq!(stored_status(&pool, 1).await, "occupied");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_apply_observations_idempotent(pool: PgPool) {
    let db = setup_store(pool.clone(), &[2, 3]).await;
    let batch = [obs(2, true), obs(3, false)];

    db.apply_observations(&batch).await.unwrap();
    let once = db.list_spots().await.unwrap();
    db.apply_observations(&batch).await.unwrap();

    assert_eq!(db.list_spots().await.unwrap(), once);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_spot_ignored(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1]).await;

    let updated = db.apply_observations(&[obs(42, true)]).await.unwrap();

    assert_eq!(updated, 0);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spots")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(stored_status(&pool, 1).await, "available");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_all_spots(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2, 3]).await;
    db.apply_observations(&[obs(2, true)]).await.unwrap();

    let unplaced = LabeledSpot {
        location: None,
        ..labeled(8, "Lot A")
    };
    db.replace_all_spots(&[labeled(2, "Lot A"), unplaced])
        .await
        .unwrap();

    let spots = db.list_spots().await.unwrap();
    assert_eq!(spots.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 8]);
    assert!(spots.iter().all(|s| s.status == SpotStatus::Available));
    assert_eq!((spots[1].latitude, spots[1].longitude), (0.0, 0.0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_rolls_back_on_missing_lot(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2]).await;
    let before = db.list_spots().await.unwrap();

    let result = db
        .replace_all_spots(&[labeled(3, "Lot A"), labeled(4, "Missing")])
        .await;

    assert!(matches!(
        result,
        Err(TrackerError::ReconciliationFailed { .. })
    ));
    assert_eq!(db.list_spots().await.unwrap(), before);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_rolls_back_on_duplicate_id(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2]).await;
    db.apply_observations(&[obs(2, true)]).await.unwrap();
    let before = db.list_spots().await.unwrap();

    let result = db
        .replace_all_spots(&[labeled(3, "Lot A"), labeled(3, "Lot A")])
        .await;

    assert!(matches!(
        result,
        Err(TrackerError::ReconciliationFailed { .. })
    ));
    assert_eq!(db.list_spots().await.unwrap(), before);
    assert_eq!(stored_status(&pool, 2).await, "occupied");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_disjoint_updates(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2, 3, 4]).await;

    let left = [obs(1, true), obs(2, true)];
    let right = [obs(3, true), obs(4, true)];

    let (first, second) = tokio::join!(
        db.apply_observations(&left),
        db.apply_observations(&right),
    );

    assert_eq!(first.unwrap(), 2);
    assert_eq!(second.unwrap(), 2);
    for id in 1..=4 {
        assert_eq!(stored_status(&pool, id).await, "occupied");
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_overlapping_updates(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2, 3, 4]).await;

    // Opposite input order on shared ids; row locks are still taken by id
    let left = [obs(4, true), obs(3, true), obs(2, true), obs(1, true)];
    let right = [obs(1, false), obs(2, false), obs(3, false), obs(4, false)];

    for _ in 0..20 {
        let (first, second) = tokio::join!(
            db.apply_observations(&left),
            db.apply_observations(&right),
        );
        assert_eq!(first.unwrap(), 4);
        assert_eq!(second.unwrap(), 4);

        // Whole batches are linearized: never a mix of both
        let statuses: Vec<SpotStatus> = db
            .list_spots()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert!(
            statuses.iter().all(|s| *s == statuses[0]),
            "mixed statuses: {statuses:?}"
        );
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_does_not_interleave_with_update(pool: PgPool) {
    let db = setup_store(pool.clone(), &[1, 2, 3]).await;

    let update = [obs(1, true), obs(2, true), obs(3, true)];
    let replacement = [labeled(2, "Lot A"), labeled(3, "Lot A"), labeled(9, "Lot A")];

    let (applied, replaced) = tokio::join!(
        db.apply_observations(&update),
        db.replace_all_spots(&replacement),
    );
    let applied = applied.unwrap();
    assert_eq!(replaced.unwrap(), 3);

    let spots = db.list_spots().await.unwrap();
    assert_eq!(spots.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 3, 9]);

    let occupied: Vec<i32> = spots
        .iter()
        .filter(|s| s.status == SpotStatus::Occupied)
        .map(|s| s.id)
        .collect();
    match applied {
        // update committed first (or found no rows), then the replace reset everything
        0 | 3 => assert!(occupied.is_empty(), "occupied: {occupied:?}"),
        // replace committed first, the update saw only spots 2 and 3
        2 => assert_eq!(occupied, vec![2, 3]),
        other => panic!("update touched {other} spots"),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_create_lot_conflict(pool: PgPool) {
    let db = setup_store(pool, &[]).await;

    let result = db
        .create_lot(&Lot {
            parking_lot_name: "Lot A".to_string(),
            hours: "9-17".to_string(),
            price: "free".to_string(),
        })
        .await;

    assert!(matches!(result, Err(TrackerError::LotExists(_))));
    let lots = db.list_lots().await.unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].hours, "24/7");
}
