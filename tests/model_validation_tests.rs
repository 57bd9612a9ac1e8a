use chrono::Utc;
use serde_json::json;
use storedesk::{
    models::{AdminRole, NewProfile, Profile, ProfileEntry, StoreScope, profile_role},
    session::{DenialReason, SessionSnapshot, SessionStatus, landing_path},
};
use uuid::Uuid;

// --- Roles ---

#[test]
fn test_role_parsing_is_exact() {
    assert_eq!(
        AdminRole::from_profile_role("SUPER_ADMIN"),
        Some(AdminRole::SuperAdmin)
    );
    assert_eq!(
        AdminRole::from_profile_role("STORE_ADMIN"),
        Some(AdminRole::StoreAdmin)
    );
    for raw in ["CUSTOMER", "super_admin", " SUPER_ADMIN", "ADMIN", ""] {
        assert_eq!(AdminRole::from_profile_role(raw), None, "{raw:?}");
    }
}

#[test]
fn test_landing_paths() {
    assert_eq!(landing_path(AdminRole::SuperAdmin), "/users");
    assert_eq!(landing_path(AdminRole::StoreAdmin), "/stores");
}

#[test]
fn test_store_scope_per_role() {
    assert_eq!(
        StoreScope::for_role(AdminRole::SuperAdmin, Some("s1")),
        StoreScope::AllStores
    );
    assert_eq!(
        StoreScope::for_role(AdminRole::StoreAdmin, Some("s1")),
        StoreScope::Store {
            store_id: "s1".to_string()
        }
    );
    assert_eq!(
        StoreScope::for_role(AdminRole::StoreAdmin, Some("")),
        StoreScope::Unassigned
    );
    assert_eq!(
        StoreScope::for_role(AdminRole::StoreAdmin, None),
        StoreScope::Unassigned
    );
}

// --- Profile payloads ---

#[test]
fn test_profile_uses_camel_case_fields() {
    let profile: Profile = serde_json::from_value(json!({
        "email": "s@x.com",
        "role": "STORE_ADMIN",
        "storeId": "s1",
        "createdAt": "2025-01-01T00:00:00Z"
    }))
    .unwrap();

    assert_eq!(profile.name, None);
    assert_eq!(profile.store_id.as_deref(), Some("s1"));
    assert_eq!(profile.admin_role(), Some(AdminRole::StoreAdmin));

    let value = serde_json::to_value(ProfileEntry {
        uid: Uuid::nil(),
        profile,
    })
    .unwrap();
    assert_eq!(value["uid"], Uuid::nil().to_string());
    assert_eq!(value["storeId"], "s1");
    assert!(value.get("store_id").is_none());
}

#[test]
fn test_unrecognized_role_survives_a_read() {
    let profile = Profile {
        email: "o@x.com".to_string(),
        role: "OWNER".to_string(),
        created_at: Utc::now(),
        ..Profile::default()
    };
    assert_eq!(profile.admin_role(), None);
    assert_eq!(profile.role, "OWNER");
}

#[test]
fn test_new_profile_normalization() {
    let store_admin = NewProfile {
        email: "s@x.com".to_string(),
        name: None,
        role: profile_role::STORE_ADMIN.to_string(),
        store_id: Some("s1".to_string()),
    };
    assert_eq!(store_admin.clone().normalized(), store_admin);

    let customer = NewProfile {
        role: profile_role::CUSTOMER.to_string(),
        ..store_admin
    };
    assert!(customer.has_known_role());
    assert_eq!(customer.normalized().store_id, None);

    let unknown = NewProfile {
        role: "OWNER".to_string(),
        ..NewProfile::default()
    };
    assert!(!unknown.has_known_role());
}

#[test]
fn test_bootstrap_and_customer_records() {
    let seed = NewProfile::bootstrap_super_admin(Some("a@x.com"));
    assert_eq!(seed.role, profile_role::SUPER_ADMIN);
    assert_eq!(seed.email, "a@x.com");
    assert_eq!(seed.store_id, None);

    // Identities without an email still get a record.
    assert_eq!(NewProfile::bootstrap_super_admin(None).email, "");

    assert_eq!(NewProfile::customer("c@x.com").role, profile_role::CUSTOMER);
}

// --- Session payloads ---

#[test]
fn test_session_status_wire_format() {
    assert_eq!(
        serde_json::to_value(SessionSnapshot::default()).unwrap(),
        json!({ "status": { "state": "resolving" }, "authError": null })
    );

    let denied = SessionSnapshot {
        status: SessionStatus::Denied {
            reason: DenialReason::VerificationFailed,
        },
        auth_error: Some(DenialReason::VerificationFailed.to_string()),
    };
    let value = serde_json::to_value(&denied).unwrap();
    assert_eq!(value["status"]["state"], "denied");
    assert_eq!(value["authError"], "error verifying permissions");

    let uid = Uuid::new_v4();
    let authorized = SessionSnapshot {
        status: SessionStatus::Authorized {
            uid,
            email: Some("s@x.com".to_string()),
            role: AdminRole::StoreAdmin,
            store_id: Some("s1".to_string()),
        },
        auth_error: None,
    };
    let value = serde_json::to_value(&authorized).unwrap();
    assert_eq!(value["status"]["state"], "authorized");
    assert_eq!(value["status"]["role"], "STORE_ADMIN");
    assert_eq!(value["status"]["storeId"], "s1");
    assert_eq!(authorized.uid(), Some(uid));
    assert_eq!(authorized.landing_path(), Some("/stores"));
    assert!(!authorized.is_super_admin());
}

#[test]
fn test_denial_reason_messages() {
    assert_eq!(DenialReason::NotPermitted.to_string(), "not permitted");
    assert_eq!(DenialReason::ProfileNotFound.to_string(), "profile not found");
    assert_eq!(
        DenialReason::VerificationFailed.to_string(),
        "error verifying permissions"
    );
}
