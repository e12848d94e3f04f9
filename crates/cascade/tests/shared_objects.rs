//! Integration tests for shared annotations, forced deletes and per-viewer
//! rendering settings.

mod common;

use cascade::domain::{
    DeleteOutcome, DeleteRequest, DenyReason, ObjectKind, PermissionLevel, RetainReason,
};
use cascade::error::ErrorKind;
use cascade::storage::GraphStore;
use common::{ALICE, BOB, World, admin, group_owner, member, outcome};
use rstest::rstest;

// ========== Reference Counting ==========

#[tokio::test]
async fn shared_tag_survives_until_its_last_referrer_goes() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let first = world.image(1, ALICE).await;
    let second = world.image(2, ALICE).await;
    let tag = world.tag(1, ALICE).await;
    world.link(first, tag).await;
    world.link(second, tag).await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(first)])
        .await
        .unwrap();

    assert_eq!(outcome(&report, first), DeleteOutcome::Deleted);
    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Retained(RetainReason::StillReferenced)
    );
    assert_eq!(outcome(&report, tag).reason(), "still referenced");
    assert_eq!(
        outcome(&report, tag).error_kind(),
        Some(ErrorKind::ConstraintRetained)
    );
    assert_eq!(world.store.get_referrers(&tag).await.unwrap(), vec![second]);

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(second)])
        .await
        .unwrap();

    assert_eq!(outcome(&report, second), DeleteOutcome::Deleted);
    assert_eq!(outcome(&report, tag), DeleteOutcome::Deleted);
    assert!(!world.exists(tag).await);
}

#[tokio::test]
async fn deleting_every_referrer_in_one_batch_deletes_the_tag() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let first = world.image(1, ALICE).await;
    let second = world.image(2, ALICE).await;
    let tag = world.tag(1, ALICE).await;
    world.link(first, tag).await;
    world.link(second, tag).await;

    let report = world
        .engine
        .delete_batch(
            &member(ALICE),
            &[DeleteRequest::new(first), DeleteRequest::new(second)],
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(outcome(&report, tag), DeleteOutcome::Deleted);
    assert!(world.store.is_empty().await);
}

#[rstest]
#[case::one_of_three(3, 1)]
#[case::two_of_three(3, 2)]
#[case::all_three(3, 3)]
#[case::one_of_one(1, 1)]
#[tokio::test]
async fn tag_linked_from_many_images(#[case] linked: i64, #[case] deleted: i64) {
    let world = World::new(PermissionLevel::Private).await;
    let tag = world.tag(100, ALICE).await;
    let mut requests = Vec::new();
    for id in 1..=linked {
        let image = world.image(id, ALICE).await;
        world.link(image, tag).await;
        if id <= deleted {
            requests.push(DeleteRequest::new(image));
        }
    }

    let report = world
        .engine
        .delete_batch(&member(ALICE), &requests)
        .await
        .unwrap();

    if deleted == linked {
        assert_eq!(outcome(&report, tag), DeleteOutcome::Deleted);
    } else {
        assert_eq!(
            outcome(&report, tag),
            DeleteOutcome::Retained(RetainReason::StillReferenced)
        );
        let remaining = world.store.get_referrers(&tag).await.unwrap();
        assert_eq!(i64::try_from(remaining.len()).unwrap(), linked - deleted);
    }
    assert_eq!(report.summary().deleted as i64, deleted + i64::from(deleted == linked));
}

// ========== Forced Deletes ==========

#[tokio::test]
async fn owner_force_unlinks_own_referrers() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let image = world.image(1, ALICE).await;
    let other = world.image(2, ALICE).await;
    let tag = world.tag(1, ALICE).await;
    world.link(image, tag).await;
    world.link(other, tag).await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(tag).forced()])
        .await
        .unwrap();

    assert_eq!(outcome(&report, tag), DeleteOutcome::Deleted);
    assert!(world.exists(image).await);
    assert!(world.store.get_children(&image).await.unwrap().is_empty());
}

#[tokio::test]
async fn force_propagates_from_forced_root() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let image = world.image(1, ALICE).await;
    let other = world.image(2, ALICE).await;
    let tag = world.tag(1, ALICE).await;
    world.link(image, tag).await;
    world.link(other, tag).await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(image).forced()])
        .await
        .unwrap();

    assert_eq!(outcome(&report, image), DeleteOutcome::Deleted);
    assert_eq!(outcome(&report, tag), DeleteOutcome::Deleted);
    assert!(world.exists(other).await);
}

#[tokio::test]
async fn tag_used_by_another_user_survives_its_owners_delete() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let tag = world.tag(1, ALICE).await;
    let bobs_image = world.image(1, BOB).await;
    world.link(bobs_image, tag).await;

    for request in [DeleteRequest::new(tag), DeleteRequest::new(tag).forced()] {
        let report = world
            .engine
            .delete_batch(&member(ALICE), &[request])
            .await
            .unwrap();

        assert_eq!(
            outcome(&report, tag),
            DeleteOutcome::Retained(RetainReason::StillReferenced)
        );
        assert!(world.exists(tag).await);
        assert_eq!(
            world.store.get_referrers(&tag).await.unwrap(),
            vec![bobs_image]
        );
    }
}

#[rstest]
#[case::administrator(admin())]
#[case::group_owner(group_owner())]
#[tokio::test]
async fn elevated_force_unlinks_other_users(#[case] principal: cascade::domain::Principal) {
    let world = World::new(PermissionLevel::Private).await;
    let tag = world.tag(1, ALICE).await;
    let bobs_image = world.image(1, BOB).await;
    world.link(bobs_image, tag).await;

    let unforced = world
        .engine
        .delete_batch(&principal, &[DeleteRequest::new(tag)])
        .await
        .unwrap();
    assert_eq!(
        outcome(&unforced, tag),
        DeleteOutcome::Retained(RetainReason::StillReferenced)
    );

    let forced = world
        .engine
        .delete_batch(&principal, &[DeleteRequest::new(tag).forced()])
        .await
        .unwrap();
    assert_eq!(outcome(&forced, tag), DeleteOutcome::Deleted);
    assert!(world.exists(bobs_image).await);
}

#[tokio::test]
async fn member_force_is_ignored() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let tag = world.tag(1, ALICE).await;
    let image = world.image(1, ALICE).await;
    world.link(image, tag).await;

    let report = world
        .engine
        .delete_batch(&member(BOB), &[DeleteRequest::new(tag).forced()])
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Retained(RetainReason::StillReferenced)
    );
}

// ========== Ownership of Linked Objects ==========

#[tokio::test]
async fn tag_owned_by_another_user_survives_deletion_of_tagged_image() {
    let world = World::new(PermissionLevel::ReadWriteCollab).await;
    let image = world.image(1, ALICE).await;
    let tag = world.tag(1, BOB).await;
    world.link(image, tag).await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(image)])
        .await
        .unwrap();

    assert_eq!(outcome(&report, image), DeleteOutcome::Deleted);
    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Retained(RetainReason::OwnedByOtherUser)
    );
    assert!(world.exists(tag).await);
    assert!(world.store.get_referrers(&tag).await.unwrap().is_empty());
}

#[tokio::test]
async fn tag_owned_by_another_user_is_denied_in_private_group() {
    let world = World::new(PermissionLevel::Private).await;
    let image = world.image(1, ALICE).await;
    let tag = world.tag(1, BOB).await;
    world.link(image, tag).await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(image)])
        .await
        .unwrap();

    assert_eq!(outcome(&report, image), DeleteOutcome::Deleted);
    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Denied(DenyReason::PermissionDenied)
    );
    assert!(world.exists(tag).await);
}

#[tokio::test]
async fn tag_linked_from_denied_image_is_judged_on_its_own() {
    let world = World::new(PermissionLevel::Private).await;
    let image = world.image(1, ALICE).await;
    let tag = world.tag(1, BOB).await;
    world.link(image, tag).await;

    let report = world
        .engine
        .delete_batch(&member(BOB), &[DeleteRequest::new(image)])
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, image),
        DeleteOutcome::Denied(DenyReason::PermissionDenied)
    );
    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Retained(RetainReason::StillReferenced)
    );
    assert!(world.exists(tag).await);
}

// ========== Rendering Settings ==========

#[tokio::test]
async fn rendering_settings_are_independent_per_viewer() {
    let world = World::new(PermissionLevel::ReadOnlyCollab).await;
    let (_, pixels) = world.image_with_pixels(1, ALICE).await;
    let alices = world
        .child(pixels, ObjectKind::RenderingSettings, 1, ALICE)
        .await;
    let bobs = world
        .child(pixels, ObjectKind::RenderingSettings, 2, BOB)
        .await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(alices)])
        .await
        .unwrap();

    assert_eq!(outcome(&report, alices), DeleteOutcome::Deleted);
    assert!(report.outcome(&bobs).is_none());
    assert!(world.exists(bobs).await);
    assert_eq!(report.len(), 1);
}

#[tokio::test]
async fn deleting_an_image_removes_every_viewers_settings() {
    let world = World::new(PermissionLevel::Private).await;
    let (image, pixels) = world.image_with_pixels(1, ALICE).await;
    let alices = world
        .child(pixels, ObjectKind::RenderingSettings, 1, ALICE)
        .await;
    let bobs = world
        .child(pixels, ObjectKind::RenderingSettings, 2, BOB)
        .await;

    let report = world
        .engine
        .delete_batch(&member(ALICE), &[DeleteRequest::new(image)])
        .await
        .unwrap();

    assert!(report.is_complete());
    for object in [image, pixels, alices, bobs] {
        assert_eq!(outcome(&report, object), DeleteOutcome::Deleted);
    }
    assert!(world.store.is_empty().await);
}

#[tokio::test]
async fn viewer_cannot_delete_image_through_own_settings() {
    let world = World::new(PermissionLevel::Private).await;
    let (image, pixels) = world.image_with_pixels(1, ALICE).await;
    let bobs = world
        .child(pixels, ObjectKind::RenderingSettings, 2, BOB)
        .await;

    let report = world
        .engine
        .delete_batch(&member(BOB), &[DeleteRequest::new(image)])
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, image),
        DeleteOutcome::Denied(DenyReason::PermissionDenied)
    );
    assert_eq!(
        outcome(&report, bobs),
        DeleteOutcome::Denied(DenyReason::BlockedByAncestor)
    );
    assert!(world.exists(bobs).await);
}

// ========== Excluded Children ==========

#[tokio::test]
async fn excluded_child_survives_and_keeps_its_links() {
    let world = World::new(PermissionLevel::Private).await;
    let dataset = world.object(ObjectKind::Dataset, 1, ALICE).await;
    let kept = world.child(dataset, ObjectKind::Image, 2, ALICE).await;
    let dropped = world.child(dataset, ObjectKind::Image, 1, ALICE).await;
    let tag = world.tag(1, ALICE).await;
    world.link(kept, tag).await;
    world.link(dropped, tag).await;

    let report = world
        .engine
        .delete_batch(
            &member(ALICE),
            &[DeleteRequest::new(dataset).excluding(kept.id)],
        )
        .await
        .unwrap();

    assert_eq!(outcome(&report, dataset), DeleteOutcome::Deleted);
    assert_eq!(outcome(&report, dropped), DeleteOutcome::Deleted);
    assert_eq!(
        outcome(&report, tag),
        DeleteOutcome::Retained(RetainReason::StillReferenced)
    );
    assert!(report.outcome(&kept).is_none());
    assert!(world.exists(kept).await);
    assert_eq!(world.store.get_referrers(&tag).await.unwrap(), vec![kept]);
}
