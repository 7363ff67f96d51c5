mod common;

use common::{CLIENT, setup};
use drive_access_core::services::broker::CapabilityAction;
use drive_access_core::services::directory::{AssetOrigin, NewAsset};
use drive_access_core::services::errors::AccessError;
use drive_access_core::services::permissions::{
    Action, DenyReason, Role, SharingMetadata, Visibility,
};

#[tokio::test]
async fn test_private_asset_lifecycle_between_colleagues() {
    let env = setup().await;
    let directory = &env.state.directory;
    let alice = env.user("alice@brand.test", Role::Standard).await;
    let bob = env.user("bob@brand.test", Role::Standard).await;

    let asset = env
        .local_asset(&alice, "alice/draft.png", "image/png", Some(Visibility::Private))
        .await;

    // Standard users read anything in their client, private or not.
    assert!(directory.check(&bob, &asset.id, Action::Read).await.unwrap().allowed);

    let denied = directory.check(&bob, &asset.id, Action::Write).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(
        denied.reason,
        Some(DenyReason::NotOwner {
            role: Role::Standard,
            action: Action::Write
        })
    );
    assert!(directory.check(&alice, &asset.id, Action::Write).await.unwrap().allowed);

    let bob_subject = directory.subject(&bob).await.unwrap();
    let err = directory
        .set_visibility(&bob_subject, &asset.id, Visibility::Shared)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_DENIED");

    let alice_subject = directory.subject(&alice).await.unwrap();
    let updated = directory
        .set_visibility(&alice_subject, &asset.id, Visibility::Shared)
        .await
        .unwrap();
    assert_eq!(updated.visibility, "shared");

    assert!(directory.tombstone(&bob_subject, &asset.id).await.is_err());
    directory.tombstone(&alice_subject, &asset.id).await.unwrap();

    for user in [&alice, &bob] {
        let result = directory.check(user, &asset.id, Action::Read).await.unwrap();
        assert_eq!(result.reason, Some(DenyReason::AssetDeleted));
    }
    // The row survives the tombstone.
    assert!(directory.asset(&asset.id).await.unwrap().deleted_at.is_some());
}

#[tokio::test]
async fn test_guest_reads_only_shared_assets() {
    let env = setup().await;
    let directory = &env.state.directory;
    let owner = env.user("owner@brand.test", Role::Editor).await;
    let guest = env.user("guest@agency.test", Role::Guest).await;

    let shared = env
        .local_asset(&owner, "shared.png", "image/png", None)
        .await;
    let private = env
        .local_asset(&owner, "private.png", "image/png", Some(Visibility::Private))
        .await;

    assert!(directory.check(&guest, &shared.id, Action::Read).await.unwrap().allowed);
    assert_eq!(
        directory
            .check(&guest, &private.id, Action::Read)
            .await
            .unwrap()
            .reason,
        Some(DenyReason::GuestRequiresShared)
    );
    assert_eq!(
        directory
            .check(&guest, &shared.id, Action::Write)
            .await
            .unwrap()
            .reason,
        Some(DenyReason::RoleForbids {
            role: Role::Guest,
            action: Action::Write
        })
    );

    let guest_subject = directory.subject(&guest).await.unwrap();
    let err = directory
        .register_asset(
            &guest_subject,
            NewAsset {
                client_id: CLIENT.to_string(),
                mime_type: "image/png".to_string(),
                visibility: None,
                source_version: "v1".to_string(),
                origin: AssetOrigin::Local {
                    storage_key: "guest.png".to_string(),
                },
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_drive_sharing_widens_guest_read() {
    let env = setup().await;
    let directory = &env.state.directory;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let guest = env.user("Guest@Agency.test", Role::Guest).await;

    let emailed = env
        .drive_asset(
            &owner,
            "emailed",
            Visibility::Private,
            SharingMetadata {
                is_shared: true,
                shared_with: vec!["guest@agency.test".to_string()],
                ..SharingMetadata::default()
            },
        )
        .await;
    let linked = env
        .drive_asset(
            &owner,
            "linked",
            Visibility::Private,
            SharingMetadata {
                has_public_link: true,
                ..SharingMetadata::default()
            },
        )
        .await;
    let closed = env
        .drive_asset(&owner, "closed", Visibility::Private, SharingMetadata::default())
        .await;

    assert!(directory.check(&guest, &emailed.id, Action::Read).await.unwrap().allowed);
    assert!(directory.check(&guest, &linked.id, Action::Read).await.unwrap().allowed);
    assert!(!directory.check(&guest, &closed.id, Action::Read).await.unwrap().allowed);
    assert!(!directory.check(&guest, &emailed.id, Action::Write).await.unwrap().allowed);
}

#[tokio::test]
async fn test_client_membership_is_required() {
    let env = setup().await;
    let directory = &env.state.directory;
    let owner = env.user("owner@brand.test", Role::Admin).await;
    let outsider = directory
        .create_user("outsider@other.test", Role::Admin)
        .await
        .unwrap();
    let root = directory
        .create_user("root@platform.test", Role::SuperAdmin)
        .await
        .unwrap();

    let asset = env.local_asset(&owner, "logo.png", "image/png", None).await;

    let result = directory
        .check(&outsider.id, &asset.id, Action::Read)
        .await
        .unwrap();
    assert_eq!(
        result.reason,
        Some(DenyReason::NotClientMember {
            client_id: CLIENT.to_string()
        })
    );
    assert!(directory.check(&root.id, &asset.id, Action::Delete).await.unwrap().allowed);

    directory.add_membership(&outsider.id, CLIENT).await.unwrap();
    directory.add_membership(&outsider.id, CLIENT).await.unwrap();
    assert!(directory.check(&outsider.id, &asset.id, Action::Read).await.unwrap().allowed);
}

#[tokio::test]
async fn test_unknown_rows() {
    let env = setup().await;
    let user = env.user("owner@brand.test", Role::Standard).await;

    let err = env
        .state
        .directory
        .check(&user, "missing", Action::Read)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ASSET_NOT_FOUND");

    let err = env
        .state
        .directory
        .check("ghost", "missing", Action::Read)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_drive_file_reimported_after_tombstone() {
    let env = setup().await;
    let directory = &env.state.directory;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let owner_subject = directory.subject(&owner).await.unwrap();
    let import = || NewAsset {
        client_id: CLIENT.to_string(),
        mime_type: "application/pdf".to_string(),
        visibility: None,
        source_version: "v2".to_string(),
        origin: AssetOrigin::Drive {
            file_id: "brand-deck".to_string(),
            sharing: SharingMetadata::default(),
        },
    };

    let first = directory.register_asset(&owner_subject, import()).await.unwrap();
    // A second live row for the same Drive file is refused.
    let err = directory
        .register_asset(&owner_subject, import())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    directory.tombstone(&owner_subject, &first.id).await.unwrap();
    assert_eq!(
        directory.asset_by_provider_file("brand-deck").await.unwrap().id,
        first.id
    );

    let second = directory.register_asset(&owner_subject, import()).await.unwrap();
    assert_ne!(second.id, first.id);
    let resolved = directory.asset_by_provider_file("brand-deck").await.unwrap();
    assert_eq!(resolved.id, second.id);
    assert!(resolved.deleted_at.is_none());

    // Capabilities for the file check against the live row.
    let capability = env
        .state
        .broker
        .issue_for_asset(&owner, &second.id, CapabilityAction::Read, 300)
        .await
        .unwrap();
    env.state
        .broker
        .consume(Some(&capability.token), "brand-deck", CapabilityAction::Read)
        .await
        .unwrap();
}
