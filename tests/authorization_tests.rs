mod common;

use common::{Harness, new_payment};
use payledger::error::PaymentError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_other_user_cannot_touch_payment() {
    let harness = Harness::default();
    let alice = harness.caller("user_a").await;
    let bob = harness.caller("user_b").await;
    assert_ne!(alice.identity.id, bob.identity.id);

    let payment = harness
        .service
        .create_payment(&alice, new_payment("BOOK-A", dec!(75)))
        .await
        .unwrap();

    let err = harness
        .service
        .get_payment(&bob, payment.payment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized { .. }));

    let err = harness
        .service
        .process_payment(&bob, payment.payment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized { .. }));

    // The rejected attempt must not have moved it
    let unchanged = harness
        .service
        .get_payment(&alice, payment.payment_id)
        .await
        .unwrap();
    assert_eq!(unchanged.status, payment.status);
}

#[tokio::test]
async fn test_listings_are_scoped_to_caller() {
    let harness = Harness::default();
    let alice = harness.caller("user_a").await;
    let bob = harness.caller("user_b").await;

    harness
        .service
        .create_payment(&alice, new_payment("SHARED", dec!(10)))
        .await
        .unwrap();
    harness
        .service
        .create_payment(&bob, new_payment("SHARED", dec!(20)))
        .await
        .unwrap();

    let alice_view = harness.service.booking_payments(&alice, "SHARED").await.unwrap();
    assert_eq!(alice_view.len(), 1);
    assert_eq!(alice_view[0].owner, alice.identity.id);

    let bob_page = harness.service.list_payments(&bob, 1, None).await.unwrap();
    assert_eq!(bob_page.total, 1);
    assert_eq!(bob_page.items[0].amount.value(), dec!(20));
}

#[tokio::test]
async fn test_status_override_is_not_owner_scoped() {
    let harness = Harness::default();
    let alice = harness.caller("user_a").await;
    let gateway = harness.caller("gateway").await;

    let payment = harness
        .service
        .create_payment(&alice, new_payment("BOOK-GW", dec!(1)))
        .await
        .unwrap();
    let updated = harness
        .service
        .update_status(&gateway, payment.payment_id, "failed", None)
        .await
        .unwrap();
    assert_eq!(updated.owner, alice.identity.id);
}
