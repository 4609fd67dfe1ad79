//! Schema migrations. Each migration is idempotent `&'static str` SQL,
//! applied in order inside one transaction; re-applying a completed
//! migration is a no-op because every statement is `IF NOT EXISTS` /
//! guarded by the `schema_version` row (spec §4.1).

/// Current schema version this binary understands. `Store::open` compares
/// this against the on-disk value and refuses to open a newer one
/// (`SchemaTooNew`).
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// One migration step: a version number and the SQL to reach it from the
/// previous version. Applied with `rusqlite::Connection::execute_batch`.
pub struct Migration {
    pub version: i64,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );

    -- Knowledge-graph entities (spec §3.1): Learning, Pattern, Mistake,
    -- CodeArea, File, Topic, DocSection, CodeDoc all share this table,
    -- discriminated by entity_type, since they overlap heavily in shape
    -- and every one of them may carry an embedding.
    CREATE TABLE IF NOT EXISTS knowledge_entities (
        id              TEXT PRIMARY KEY,
        entity_type     TEXT NOT NULL,
        content         TEXT,
        name            TEXT,
        description     TEXT,
        how_fixed       TEXT,
        heading         TEXT,
        location        TEXT,
        source_issue    TEXT,
        code_area       TEXT,
        file_path       TEXT,
        confidence      REAL,
        tags            TEXT,
        code_entity_id  TEXT,
        spec_version    TEXT,
        created_at      INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_knowledge_entities_type ON knowledge_entities(entity_type);
    CREATE INDEX IF NOT EXISTS idx_knowledge_entities_code_area ON knowledge_entities(code_area);
    CREATE INDEX IF NOT EXISTS idx_knowledge_entities_file_path ON knowledge_entities(file_path);
    CREATE INDEX IF NOT EXISTS idx_knowledge_entities_code_entity_id ON knowledge_entities(code_entity_id);

    CREATE TABLE IF NOT EXISTS knowledge_embeddings (
        entity_id  TEXT PRIMARY KEY REFERENCES knowledge_entities(id) ON DELETE CASCADE,
        model_id   TEXT NOT NULL,
        dimension  INTEGER NOT NULL,
        vector     BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS knowledge_relationships (
        from_id  TEXT NOT NULL REFERENCES knowledge_entities(id) ON DELETE CASCADE,
        to_id    TEXT NOT NULL,
        rel_type TEXT NOT NULL,
        PRIMARY KEY (from_id, to_id, rel_type)
    );

    CREATE INDEX IF NOT EXISTS idx_knowledge_rel_to ON knowledge_relationships(to_id);

    CREATE TABLE IF NOT EXISTS doc_index (
        file_path    TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL
    );

    -- Code-graph entities (spec §3.2). `to_id` of a code_relationship is
    -- deliberately not foreign-keyed: it may be `external:{module}`.
    CREATE TABLE IF NOT EXISTS code_entities (
        id        TEXT PRIMARY KEY,
        package   TEXT NOT NULL,
        file_path TEXT NOT NULL,
        kind      TEXT NOT NULL,
        name      TEXT NOT NULL,
        line      INTEGER,
        exported  INTEGER NOT NULL DEFAULT 0,
        metadata  TEXT,
        jsdoc     TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_code_entities_package ON code_entities(package);
    CREATE INDEX IF NOT EXISTS idx_code_entities_file_path ON code_entities(file_path);
    CREATE INDEX IF NOT EXISTS idx_code_entities_name ON code_entities(name);
    CREATE INDEX IF NOT EXISTS idx_code_entities_kind ON code_entities(kind);

    CREATE TABLE IF NOT EXISTS code_relationships (
        from_id  TEXT NOT NULL REFERENCES code_entities(id) ON DELETE CASCADE,
        to_id    TEXT NOT NULL,
        rel_type TEXT NOT NULL,
        metadata TEXT,
        PRIMARY KEY (from_id, to_id, rel_type)
    );

    CREATE INDEX IF NOT EXISTS idx_code_rel_to ON code_relationships(to_id);
    CREATE INDEX IF NOT EXISTS idx_code_rel_type ON code_relationships(rel_type);

    CREATE TABLE IF NOT EXISTS code_file_metadata (
        package        TEXT NOT NULL,
        file_path      TEXT NOT NULL,
        mtime_ms        INTEGER NOT NULL,
        last_parsed_at INTEGER NOT NULL,
        entity_count   INTEGER NOT NULL,
        PRIMARY KEY (package, file_path)
    );

    -- Workflow / milestone / session checkpoint entities (spec §3.4).
    CREATE TABLE IF NOT EXISTS workflows (
        id           TEXT PRIMARY KEY,
        issue_number INTEGER,
        branch       TEXT NOT NULL,
        worktree     TEXT,
        phase        TEXT NOT NULL,
        status       TEXT NOT NULL,
        retry_count  INTEGER NOT NULL DEFAULT 0,
        created_at   INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);

    CREATE TABLE IF NOT EXISTS workflow_actions (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        action      TEXT NOT NULL,
        result      TEXT NOT NULL,
        metadata    TEXT,
        created_at  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS workflow_commits (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        sha         TEXT NOT NULL,
        message     TEXT NOT NULL,
        created_at  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS milestones (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        github_number INTEGER,
        phase         TEXT NOT NULL,
        status        TEXT NOT NULL,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS milestone_baselines (
        milestone_id TEXT PRIMARY KEY REFERENCES milestones(id) ON DELETE CASCADE,
        lint_exit    INTEGER NOT NULL,
        lint_warn    INTEGER NOT NULL,
        lint_err     INTEGER NOT NULL,
        tc_exit      INTEGER NOT NULL,
        tc_err       INTEGER NOT NULL,
        captured_at  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS milestone_workflows (
        milestone_id TEXT NOT NULL REFERENCES milestones(id) ON DELETE CASCADE,
        workflow_id  TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        wave         INTEGER,
        PRIMARY KEY (milestone_id, workflow_id)
    );

    CREATE TABLE IF NOT EXISTS session_metrics (
        session_id          TEXT PRIMARY KEY,
        issue_number        INTEGER,
        files_read          INTEGER NOT NULL DEFAULT 0,
        compacted           INTEGER NOT NULL DEFAULT 0,
        duration_minutes    INTEGER,
        review_findings     INTEGER NOT NULL DEFAULT 0,
        learnings_injected  INTEGER NOT NULL DEFAULT 0,
        learnings_captured  INTEGER NOT NULL DEFAULT 0,
        created_at          INTEGER NOT NULL
    );
    "#,
}];
