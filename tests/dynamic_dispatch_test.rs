use chrono::Utc;
use loyalty_engine::domain::cashback::NewCashback;
use loyalty_engine::domain::money::Currency;
use loyalty_engine::domain::ports::{
    CashbackStore, CashbackStoreRef, CreateOutcome, LoyaltyStore, LoyaltyStoreRef, ProgressionCommit,
    UserDirectory, UserDirectoryRef,
};
use loyalty_engine::domain::purchase::PurchaseEvent;
use loyalty_engine::domain::user::User;
use loyalty_engine::infrastructure::in_memory::{
    InMemoryCashbackStore, InMemoryLoyaltyStore, InMemoryUserDirectory,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_stores_as_trait_objects() {
    let users: UserDirectoryRef = Arc::new(InMemoryUserDirectory::with_users([User::new(
        1,
        "Ada",
        "ada@example.com",
    )]));
    let loyalty: LoyaltyStoreRef = Arc::new(InMemoryLoyaltyStore::new());
    let cashbacks: CashbackStoreRef = Arc::new(InMemoryCashbackStore::new());

    // Verify Send + Sync by spawning tasks
    let user_handle = tokio::spawn({
        let users = users.clone();
        async move { users.get(1).await.unwrap().unwrap() }
    });

    let loyalty_handle = tokio::spawn({
        let loyalty = loyalty.clone();
        async move {
            let purchase = PurchaseEvent::new(1, dec!(25))
                .into_new_purchase(&Currency::default(), Utc::now())
                .unwrap();
            loyalty
                .commit_progression(ProgressionCommit {
                    purchase,
                    achievement_progress: vec![],
                    badge_progress: vec![],
                })
                .await
                .unwrap()
        }
    });

    let cashback_handle = tokio::spawn({
        let cashbacks = cashbacks.clone();
        async move {
            cashbacks
                .create_if_absent(NewCashback {
                    user_id: 1,
                    purchase_id: 1,
                    amount: dec!(10),
                    currency: Currency::default(),
                    idempotency_key: "cashback_1_1_spawned1".to_string(),
                    payment_provider: "mock".to_string(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap()
        }
    });

    assert_eq!(user_handle.await.unwrap().email, "ada@example.com");
    assert_eq!(loyalty_handle.await.unwrap().purchase().id, 1);
    assert!(matches!(
        cashback_handle.await.unwrap(),
        CreateOutcome::Created(_)
    ));

    assert_eq!(loyalty.purchases_for_user(1).await.unwrap().len(), 1);
    assert!(cashbacks.find_by_purchase(1, 1).await.unwrap().is_some());
}
