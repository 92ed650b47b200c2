use std::fs;
use std::path::Path;

use tempfile::TempDir;
use workbench_core::api::Identity;
use workbench_core::repository::{
    GitRepositoryFactory, Repository, RepositoryFactory, RepositoryHandle, FAKE_USER_EMAIL,
    FAKE_USER_NAME,
};
use workbench_core::{Error, Result};

#[test]
fn sequential_commits_get_distinct_ids() -> Result<()> {
    let (_temp, repo) = fixture();

    write_file(repo.root(), "notes.txt", "one\n");
    let first = repo.commit(&paths(&["notes.txt"]), "first")?;
    write_file(repo.root(), "notes.txt", "two\n");
    let second = repo.commit(&paths(&["notes.txt"]), "second")?;

    assert_ne!(first.id, second.id);
    assert_eq!(repo.head_commit_id()?, Some(second.id.clone()));
    assert_eq!(repo.get_commit(&first.id)?.message, "first");
    Ok(())
}

#[test]
fn commit_rejects_empty_and_unchanged_paths() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "a\n");
    repo.commit(&paths(&["a.txt"]), "add a")?;

    assert!(matches!(repo.commit(&[], "empty"), Err(Error::EmptyCommit)));
    assert!(matches!(
        repo.commit(&paths(&["a.txt"]), "again"),
        Err(Error::NothingToCommit { .. })
    ));
    assert!(matches!(
        repo.commit(&paths(&["missing.txt"]), "ghost"),
        Err(Error::NothingToCommit { .. })
    ));
    assert_eq!(repo.log(10)?.len(), 1);
    Ok(())
}

#[test]
fn commit_without_identity_leaves_index_untouched() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "a\n");
    repo.commit(&paths(&["a.txt"]), "add a")?;
    write_file(repo.root(), "b.txt", "b\n");
    let index_before = read_index(&repo);

    let anonymous = repo.clone().with_identity(Identity::new("", ""));
    assert!(matches!(
        anonymous.commit(&paths(&["b.txt"]), "nameless"),
        Err(Error::Commit { .. })
    ));

    assert_eq!(read_index(&repo), index_before);
    assert_eq!(repo.uncommitted_files()?, paths(&["b.txt"]));
    assert_eq!(repo.log(10)?.len(), 1);
    Ok(())
}

#[test]
fn refused_commit_leaves_index_untouched() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "a\n");
    let first = repo.commit(&paths(&["a.txt"]), "add a")?;
    write_file(repo.root(), "a.txt", "changed\n");
    let index_before = read_index(&repo);

    let head = fs::read_to_string(repo.root().join(".git/HEAD")).expect("read HEAD");
    let branch = head.trim().trim_start_matches("ref: ");
    let lock = repo.root().join(".git").join(format!("{branch}.lock"));
    fs::write(&lock, "").expect("lock branch");

    assert!(matches!(
        repo.commit(&paths(&["a.txt"]), "blocked"),
        Err(Error::Commit { .. })
    ));
    assert_eq!(read_index(&repo), index_before);

    fs::remove_file(&lock).expect("unlock branch");
    assert_eq!(repo.head_commit_id()?, Some(first.id));
    let second = repo.commit(&paths(&["a.txt"]), "unblocked")?;
    assert_eq!(second.files, paths(&["a.txt"]));
    assert!(repo.uncommitted_files()?.is_empty());
    Ok(())
}

#[test]
fn file_at_revision_reports_missing_revision_and_path() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "a\n");
    let commit = repo.commit(&paths(&["a.txt"]), "add a")?;

    assert!(matches!(
        repo.file_at_revision("0000000000000000000000000000000000000000", "a.txt"),
        Err(Error::RevisionNotFound { .. })
    ));
    assert!(matches!(
        repo.file_at_revision("not-a-revision", "a.txt"),
        Err(Error::RevisionNotFound { .. })
    ));
    assert!(matches!(
        repo.file_at_revision(&commit.id, "b.txt"),
        Err(Error::PathNotFound { .. })
    ));
    Ok(())
}

#[test]
fn old_revisions_keep_old_contents() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "version 1\n");
    let first = repo.commit(&paths(&["a.txt"]), "v1")?;
    write_file(repo.root(), "a.txt", "version 2\n");
    let second = repo.commit(&paths(&["a.txt"]), "v2")?;

    let old = repo.file_at_revision(&first.id, "a.txt")?;
    let new = repo.file_at_revision(&second.id, "a.txt")?;
    assert_eq!(old.contents, "version 1\n");
    assert_eq!(new.contents, "version 2\n");
    assert_ne!(old.id, new.id);
    assert_eq!(repo.file_at_revision("HEAD", "a.txt")?, new);
    Ok(())
}

#[test]
fn deleting_a_file_can_be_committed() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "keep.txt", "keep\n");
    write_file(repo.root(), "gone.txt", "gone\n");
    let before = repo.commit(&paths(&["keep.txt", "gone.txt"]), "add both")?;

    fs::remove_file(repo.root().join("gone.txt")).expect("remove file");
    assert_eq!(repo.uncommitted_files()?, vec!["gone.txt".to_owned()]);

    let after = repo.commit(&paths(&["gone.txt"]), "remove gone")?;
    assert_eq!(after.files, vec!["gone.txt".to_owned()]);
    assert!(repo.uncommitted_files()?.is_empty());
    assert!(repo.file_at_revision(&before.id, "gone.txt").is_ok());
    assert!(matches!(
        repo.file_at_revision(&after.id, "gone.txt"),
        Err(Error::PathNotFound { .. })
    ));
    Ok(())
}

#[test]
fn log_is_newest_first_and_limited() -> Result<()> {
    let (_temp, repo) = fixture();
    let mut ids = Vec::new();
    for round in 0..4 {
        write_file(repo.root(), "counter.txt", &format!("{round}\n"));
        ids.push(repo.commit(&paths(&["counter.txt"]), &format!("round {round}"))?.id);
    }

    let log = repo.log(10)?;
    let logged: Vec<String> = log.iter().map(|commit| commit.id.clone()).collect();
    ids.reverse();
    assert_eq!(logged, ids);

    assert_eq!(repo.log(2)?.len(), 2);
    assert!(repo.log(0)?.is_empty());
    Ok(())
}

#[test]
fn uncommitted_files_include_nested_untracked_files() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "top.txt", "top\n");
    write_file(repo.root(), "nested/deeper/leaf.txt", "leaf\n");

    assert_eq!(
        repo.uncommitted_files()?,
        vec!["nested/deeper/leaf.txt".to_owned(), "top.txt".to_owned()]
    );
    Ok(())
}

#[test]
fn binary_contents_are_rejected() -> Result<()> {
    let (_temp, repo) = fixture();
    let target = repo.root().join("image.bin");
    fs::write(&target, [0xff, 0xfe, 0x00, 0x80]).expect("write binary");
    repo.commit(&paths(&["image.bin"]), "binary")?;

    assert!(matches!(
        repo.file_at_revision("HEAD", "image.bin"),
        Err(Error::BinaryFile { .. })
    ));
    assert!(matches!(
        repo.working_file("image.bin"),
        Err(Error::BinaryFile { .. })
    ));
    Ok(())
}

#[test]
fn working_file_reads_uncommitted_contents() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "draft.txt", "draft\n");

    assert_eq!(repo.working_file("draft.txt")?.as_deref(), Some("draft\n"));
    assert_eq!(repo.working_file("absent.txt")?, None);
    assert_eq!(repo.working_file("nested")?, None);
    Ok(())
}

#[test]
fn factory_handles_share_configured_identity() -> Result<()> {
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("repo");
    let factory = GitRepositoryFactory::with_identity(Identity::new("Review Bot", "bot@example.com"));

    let handle = factory.create(&path);
    handle.init()?;
    write_file(handle.root(), "a.txt", "a\n");
    let commit = handle.commit(&paths(&["a.txt"]), "from factory")?;

    assert_eq!(commit.author, Identity::new("Review Bot", "bot@example.com"));
    Ok(())
}

#[test]
fn fake_users_data_sets_local_identity() -> Result<()> {
    let (_temp, repo) = fixture();
    write_file(repo.root(), "a.txt", "a\n");
    let commit = repo.commit(&paths(&["a.txt"]), "as fake user")?;

    assert_eq!(commit.author.name, FAKE_USER_NAME);
    assert_eq!(commit.author.email, FAKE_USER_EMAIL);
    Ok(())
}

fn fixture() -> (TempDir, Repository) {
    let temp = TempDir::new().expect("tempdir");
    let repo = Repository::new(temp.path().join("repo"));
    repo.init().expect("init repository");
    repo.set_fake_users_data().expect("set fake users data");
    (temp, repo)
}

fn read_index(repo: &Repository) -> Option<Vec<u8>> {
    fs::read(repo.root().join(".git/index")).ok()
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(target, contents).expect("write file");
}
