use super::store::NewLinkedIdentity;
use super::*;
use crate::credentials::TokenCipher;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;

fn test_cipher() -> Arc<TokenCipher> {
    Arc::new(TokenCipher::from_base64_key(&BASE64.encode([3u8; 32])).unwrap())
}

fn create_test_linker() -> AccountLinker {
    let store = Arc::new(AccountStore::new(":memory:").unwrap());
    AccountLinker::new(store, test_cipher())
}

fn profile(email: &str) -> ExternalProfile {
    ExternalProfile {
        email: Some(email.to_string()),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        display_name: "Ada Lovelace".to_string(),
        avatar: String::new(),
    }
}

fn grant(subject_id: &str, access_token: &str) -> IdentityGrant {
    IdentityGrant {
        provider: "google".to_string(),
        subject_id: subject_id.to_string(),
        access_token: access_token.to_string(),
        refresh_token: Some(format!("{}-refresh", access_token)),
        expires_at: Some(1_700_003_600),
        account_email: Some("a@x.com".to_string()),
    }
}

fn signup(linker: &AccountLinker, email: &str) -> LocalAccount {
    linker
        .store()
        .create_account(&NewAccount {
            email: email.to_string(),
            password_hash: Some("hash".to_string()),
            ..Default::default()
        })
        .unwrap()
}

mod email_first {
    use super::*;

    #[test]
    fn new_user_creates_account_and_identity() {
        let linker = create_test_linker();

        let resolution = linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        assert_eq!(resolution.outcome, LinkOutcome::CreatedAccount);
        assert_eq!(resolution.account.email, "a@x.com");
        assert_eq!(resolution.account.password_hash, None);
        assert_eq!(resolution.account.first_name, "Ada");
        assert_eq!(resolution.account.last_name, "Lovelace");
        assert_eq!(resolution.account.display_name, "Ada Lovelace");
        assert_eq!(resolution.identity.provider, "google");
        assert_eq!(resolution.identity.subject_id, "S1");
        assert_eq!(resolution.identity.account_id, resolution.account.id);

        let store = linker.store();
        assert_eq!(store.count_accounts().unwrap(), 1);
        assert_eq!(store.count_identities().unwrap(), 1);
    }

    #[test]
    fn repeat_login_refreshes_tokens_in_place() {
        let linker = create_test_linker();

        let first = linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();
        let second = linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT2"))
            .unwrap();

        assert_eq!(second.outcome, LinkOutcome::RefreshedTokens);
        assert_eq!(second.account.id, first.account.id);
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(linker.store().count_identities().unwrap(), 1);

        let tokens = linker.provider_tokens(&second.identity).unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("AT2-refresh"));
    }

    #[test]
    fn existing_signup_gets_identity_attached() {
        let linker = create_test_linker();
        let existing = signup(&linker, "b@x.com");

        let resolution = linker
            .resolve_email_first(&profile("B@x.com"), &grant("S2", "AT1"))
            .unwrap();

        assert_eq!(resolution.outcome, LinkOutcome::LinkedExisting);
        assert_eq!(resolution.account, existing);
        assert_eq!(resolution.identity.account_id, existing.id);
        assert_eq!(linker.store().count_accounts().unwrap(), 1);
        assert_eq!(linker.store().count_identities().unwrap(), 1);
    }

    #[test]
    fn identity_of_other_account_is_rejected() {
        let linker = create_test_linker();
        linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();
        let other = signup(&linker, "c@x.com");

        let result = linker.resolve_email_first(&profile("c@x.com"), &grant("S1", "AT2"));

        assert!(matches!(
            result,
            Err(AccountLinkError::IdentityOwnedByOtherAccount { .. })
        ));
        assert!(linker.store().identities_for_account(&other.id).unwrap().is_empty());
    }

    #[test]
    fn second_subject_for_same_account_conflicts() {
        let linker = create_test_linker();
        linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        let result = linker.resolve_email_first(&profile("a@x.com"), &grant("S9", "AT1"));

        assert!(matches!(result, Err(AccountLinkError::Conflict(_))));
        assert_eq!(linker.store().count_identities().unwrap(), 1);
    }

    #[test]
    fn missing_email_cannot_create_account() {
        let linker = create_test_linker();
        let mut no_email = profile("a@x.com");
        no_email.email = None;

        let result = linker.resolve_email_first(&no_email, &grant("S1", "AT1"));

        assert_eq!(result, Err(AccountLinkError::MissingEmail));
        assert_eq!(linker.store().count_accounts().unwrap(), 0);
    }
}

mod subject_first {
    use super::*;

    #[test]
    fn new_subject_creates_account_and_identity() {
        let linker = create_test_linker();

        let resolution = linker
            .resolve_subject_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        assert_eq!(resolution.outcome, LinkOutcome::CreatedAccount);
        assert_eq!(linker.store().count_accounts().unwrap(), 1);
        assert_eq!(linker.store().count_identities().unwrap(), 1);
    }

    #[test]
    fn known_subject_refreshes_even_if_email_changed() {
        let linker = create_test_linker();
        let first = linker
            .resolve_subject_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        let second = linker
            .resolve_subject_first(&profile("renamed@x.com"), &grant("S1", "AT2"))
            .unwrap();

        assert_eq!(second.outcome, LinkOutcome::RefreshedTokens);
        assert_eq!(second.account.id, first.account.id);
        assert_eq!(second.account.email, "a@x.com");
        assert_eq!(
            linker.provider_tokens(&second.identity).unwrap().access_token,
            "AT2"
        );
        assert_eq!(linker.store().count_accounts().unwrap(), 1);
    }

    #[test]
    fn reuses_account_with_matching_email() {
        let linker = create_test_linker();
        let existing = signup(&linker, "b@x.com");

        let resolution = linker
            .resolve_subject_first(&profile("b@x.com"), &grant("S2", "AT1"))
            .unwrap();

        assert_eq!(resolution.outcome, LinkOutcome::LinkedExisting);
        assert_eq!(resolution.account.id, existing.id);
        assert_eq!(linker.store().count_accounts().unwrap(), 1);
    }

    #[test]
    fn known_subject_needs_no_email() {
        let linker = create_test_linker();
        linker
            .resolve_subject_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        let resolution = linker
            .resolve_subject_first(&ExternalProfile::default(), &grant("S1", "AT2"))
            .unwrap();
        assert_eq!(resolution.outcome, LinkOutcome::RefreshedTokens);
    }
}

mod persistence {
    use super::*;

    #[test]
    fn tokens_are_stored_encrypted() {
        let linker = create_test_linker();
        let resolution = linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        let stored = linker.store().find_identity("google", "S1").unwrap().unwrap();
        assert_ne!(stored.access_token, "AT1");
        assert_ne!(stored.refresh_token, "AT1-refresh");
        assert_eq!(stored, resolution.identity);
    }

    #[test]
    fn absent_refresh_token_is_stored_empty() {
        let linker = create_test_linker();
        let mut no_refresh = grant("S1", "AT1");
        no_refresh.refresh_token = None;
        no_refresh.expires_at = None;

        let resolution = linker
            .resolve_email_first(&profile("a@x.com"), &no_refresh)
            .unwrap();

        assert_eq!(resolution.identity.refresh_token, "");
        assert_eq!(resolution.identity.expires_at, None);

        let tokens = linker.provider_tokens(&resolution.identity).unwrap();
        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token, None);
    }

    #[test]
    fn refresh_replaces_expiry() {
        let linker = create_test_linker();
        linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        let mut later = grant("S1", "AT2");
        later.expires_at = Some(1_800_000_000);
        let resolution = linker.resolve_email_first(&profile("a@x.com"), &later).unwrap();

        assert_eq!(resolution.identity.expires_at, Some(1_800_000_000));
    }

    #[test]
    fn undecryptable_identity_does_not_break_lookup() {
        let store = Arc::new(AccountStore::new(":memory:").unwrap());
        let old_linker = AccountLinker::new(store.clone(), Arc::new(TokenCipher::generate()));
        old_linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT1"))
            .unwrap();

        // Simulates a restart without a persisted key
        let linker = AccountLinker::new(store, Arc::new(TokenCipher::generate()));

        let identity = linker.store().find_identity("google", "S1").unwrap().unwrap();
        assert!(linker.provider_tokens(&identity).is_err());

        let resolution = linker
            .resolve_email_first(&profile("a@x.com"), &grant("S1", "AT2"))
            .unwrap();
        assert_eq!(resolution.outcome, LinkOutcome::RefreshedTokens);
        assert_eq!(
            linker.provider_tokens(&resolution.identity).unwrap().access_token,
            "AT2"
        );
    }

    #[test]
    fn failed_identity_insert_leaves_no_orphan_account() {
        let linker = create_test_linker();
        let holder = signup(&linker, "holder@x.com");
        linker
            .store()
            .insert_identity(&NewLinkedIdentity {
                account_id: &holder.id,
                provider: "google",
                subject_id: "S1",
                access_token: "enc",
                refresh_token: "",
                expires_at: None,
                account_email: None,
            })
            .unwrap();

        // Email-first misses on email, creates the account, then hits the
        // unique (provider, subject_id) constraint.
        let result = linker.resolve_email_first(&profile("new@x.com"), &grant("S1", "AT1"));

        assert!(matches!(result, Err(AccountLinkError::Conflict(_))));
        assert!(linker.store().find_account_by_email("new@x.com").unwrap().is_none());
        assert_eq!(linker.store().count_accounts().unwrap(), 1);
    }
}

mod concurrency {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_duplicate_identity_insert_has_one_winner() {
        let linker = create_test_linker();
        let first = signup(&linker, "a@x.com");
        let second = signup(&linker, "b@x.com");
        let shared = Arc::new(linker);

        let handles: Vec<_> = [first.id, second.id]
            .into_iter()
            .map(|account_id| {
                let linker = shared.clone();
                thread::spawn(move || {
                    linker.store().insert_identity(&NewLinkedIdentity {
                        account_id: &account_id,
                        provider: "google",
                        subject_id: "S1",
                        access_token: "enc",
                        refresh_token: "",
                        expires_at: None,
                        account_email: None,
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict(_))))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(conflicts, 1);

        let err: AccountLinkError = results
            .into_iter()
            .find_map(Result::err)
            .unwrap()
            .into();
        assert!(matches!(err, AccountLinkError::Conflict(_)));
    }

    #[test]
    fn concurrent_first_logins_share_one_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.db");
        let cipher = test_cipher();
        // Schema first, so both connections open an initialized database
        AccountStore::new(&path).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let path = path.clone();
                let cipher = cipher.clone();
                thread::spawn(move || {
                    let store = Arc::new(AccountStore::new(&path).unwrap());
                    let linker = AccountLinker::new(store, cipher);
                    linker.resolve_email_first(&profile("a@x.com"), &grant("S1", &format!("AT{}", i)))
                })
            })
            .collect();

        let resolutions: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(resolutions[0].account.id, resolutions[1].account.id);

        let store = AccountStore::new(&path).unwrap();
        assert_eq!(store.count_accounts().unwrap(), 1);
        assert_eq!(store.count_identities().unwrap(), 1);
    }
}
