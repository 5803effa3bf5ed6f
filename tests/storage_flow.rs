//! End-to-end flow over the storage core: upload, versioning, sharing,
//! redemption and deletion against a real database and blob directory.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use obsilock::db::NewUser;
use obsilock::share::ShareOptions;
use obsilock::{
    BlobStorage, Database, FileService, MasterKey, ObsiLockError, Redemption, ShareKind,
    ShareService, ShareValidity, TokenSigner, UploadOptions, UserRepository,
};

struct TestApp {
    db: Database,
    _blob_dir: TempDir,
    storage: BlobStorage,
    master_key: MasterKey,
    signer: TokenSigner,
}

impl TestApp {
    async fn start() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let blob_dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(blob_dir.path()).unwrap();
        let master_key = MasterKey::from_base64(&MasterKey::generate_base64()).unwrap();
        let signer = TokenSigner::new("integration_test_signing_secret_32b!").unwrap();

        Self {
            db,
            _blob_dir: blob_dir,
            storage,
            master_key,
            signer,
        }
    }

    fn files(&self) -> FileService<'_> {
        FileService::new(
            self.db.pool(),
            &self.storage,
            &self.master_key,
            50 * 1024 * 1024,
        )
    }

    fn shares(&self) -> ShareService<'_> {
        ShareService::new(self.db.pool(), &self.signer)
    }

    async fn create_user(&self, email: &str, quota_total: i64) -> i64 {
        UserRepository::new(self.db.pool())
            .create(&NewUser::new(email, "hash").with_quota_total(quota_total))
            .await
            .unwrap()
            .id
    }
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[tokio::test]
async fn test_full_lifecycle() {
    let app = TestApp::start().await;
    let user_id = app.create_user("alice@obsilock.fr", 1_000_000).await;
    let files = app.files();
    let shares = app.shares();

    // Upload a document spanning several cipher chunks
    let v1: Vec<u8> = (0..30_000).map(|i| (i % 247) as u8).collect();
    let stored = files
        .upload(
            user_id,
            &mut &v1[..],
            &UploadOptions::new("thesis.pdf").with_mime_type("application/pdf"),
        )
        .await
        .unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.checksum, checksum(&v1));

    // Ciphertext on disk is never the plaintext
    let versions = files.list_versions(user_id, stored.file_id).await.unwrap();
    let blob = std::fs::read(app.storage.blob_path(&versions[0].stored_name)).unwrap();
    assert!(blob.len() > v1.len());
    assert_ne!(&blob[..64], &v1[..64]);

    // Replace the content, then verify both versions stay readable
    let v2 = b"final version, much shorter".to_vec();
    let appended = files
        .add_version(user_id, stored.file_id, &mut &v2[..], None)
        .await
        .unwrap();
    assert_eq!(appended.version, 2);

    let head = files.fetch(user_id, stored.file_id, None).await.unwrap();
    assert_eq!(head.content, v2);
    assert_eq!(head.file.current_version, 2);

    let original = files.fetch(user_id, stored.file_id, Some(1)).await.unwrap();
    assert_eq!(original.content, v1);

    // Quota covers both versions
    let usage = files.quota(user_id).await.unwrap();
    assert_eq!(usage.used, (v1.len() + v2.len()) as i64);

    // Share the file with a two-use limit and redeem it twice
    let share = shares
        .create(
            user_id,
            ShareKind::File,
            stored.file_id,
            &ShareOptions::default()
                .with_label("committee")
                .with_max_uses(2)
                .with_expiry(Utc::now() + Duration::days(7)),
        )
        .await
        .unwrap();

    for expected_left in [1, 0] {
        match shares.redeem(&share.token, Utc::now()).await.unwrap() {
            Redemption::Granted { share: redeemed } => {
                assert_eq!(redeemed.target_id, stored.file_id);
                assert_eq!(redeemed.remaining_uses, Some(expected_left));
            }
            Redemption::Denied { validity } => panic!("denied: {validity:?}"),
        }
    }

    // Third redemption is refused without touching the counter
    match shares.redeem(&share.token, Utc::now()).await.unwrap() {
        Redemption::Denied { validity } => assert_eq!(validity, ShareValidity::NoUsesLeft),
        Redemption::Granted { .. } => panic!("exhausted share redeemed"),
    }

    // Delete the file: quota returns to zero and all blobs are gone
    let all_versions = files.list_versions(user_id, stored.file_id).await.unwrap();
    assert_eq!(all_versions.len(), 2);
    let stored_names: Vec<String> =
        all_versions.iter().map(|v| v.stored_name.clone()).collect();
    files.delete_file(user_id, stored.file_id).await.unwrap();

    assert_eq!(files.quota(user_id).await.unwrap().used, 0);
    for name in &stored_names {
        assert!(!app.storage.exists(name));
    }
}

#[tokio::test]
async fn test_isolation_between_users() {
    let app = TestApp::start().await;
    let alice = app.create_user("alice@obsilock.fr", 1_000_000).await;
    let bob = app.create_user("bob@obsilock.fr", 1_000_000).await;
    let files = app.files();
    let shares = app.shares();

    let stored = files
        .upload(alice, &mut &b"alice's data"[..], &UploadOptions::new("a.txt"))
        .await
        .unwrap();

    // Bob cannot read, extend, delete or share Alice's file
    assert!(matches!(
        files.fetch(bob, stored.file_id, None).await,
        Err(ObsiLockError::Forbidden(_))
    ));
    assert!(matches!(
        files
            .add_version(bob, stored.file_id, &mut &b"x"[..], None)
            .await,
        Err(ObsiLockError::Forbidden(_))
    ));
    assert!(matches!(
        files.delete_file(bob, stored.file_id).await,
        Err(ObsiLockError::Forbidden(_))
    ));
    assert!(matches!(
        shares
            .create(bob, ShareKind::File, stored.file_id, &ShareOptions::default())
            .await,
        Err(ObsiLockError::Forbidden(_))
    ));

    // Bob's quota is untouched by Alice's upload
    assert_eq!(files.quota(bob).await.unwrap().used, 0);
}

#[tokio::test]
async fn test_share_revocation_closes_access() {
    let app = TestApp::start().await;
    let user_id = app.create_user("alice@obsilock.fr", 1_000_000).await;
    let files = app.files();
    let shares = app.shares();

    let stored = files
        .upload(user_id, &mut &b"shared"[..], &UploadOptions::new("s.txt"))
        .await
        .unwrap();

    let share = shares
        .create(user_id, ShareKind::File, stored.file_id, &ShareOptions::default())
        .await
        .unwrap();

    assert!(matches!(
        shares.redeem(&share.token, Utc::now()).await.unwrap(),
        Redemption::Granted { .. }
    ));

    shares.revoke(user_id, share.id).await.unwrap();

    match shares.redeem(&share.token, Utc::now()).await.unwrap() {
        Redemption::Denied { validity } => assert_eq!(validity, ShareValidity::Revoked),
        Redemption::Granted { .. } => panic!("revoked share redeemed"),
    }
}

#[tokio::test]
async fn test_quota_recovers_after_failed_upload() {
    let app = TestApp::start().await;
    let user_id = app.create_user("alice@obsilock.fr", 1_000).await;
    let files = app.files();

    files
        .upload(user_id, &mut &vec![0u8; 600][..], &UploadOptions::new("a.bin"))
        .await
        .unwrap();

    // Second upload does not fit
    let result = files
        .upload(user_id, &mut &vec![0u8; 600][..], &UploadOptions::new("b.bin"))
        .await;
    assert!(matches!(result, Err(ObsiLockError::QuotaExceeded(_))));
    assert_eq!(files.quota(user_id).await.unwrap().used, 600);

    // A smaller one still does
    files
        .upload(user_id, &mut &vec![0u8; 400][..], &UploadOptions::new("c.bin"))
        .await
        .unwrap();
    assert_eq!(files.quota(user_id).await.unwrap().used, 1_000);
}
