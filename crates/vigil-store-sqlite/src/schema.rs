//! SQL schema for the Vigil SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema generation for later migrations.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Directory ──────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS orgs (
    org_id  TEXT PRIMARY KEY,
    name    TEXT NOT NULL,
    active  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS venues (
    venue_id        TEXT PRIMARY KEY,
    org_id          TEXT NOT NULL REFERENCES orgs(org_id),
    name            TEXT NOT NULL,
    manager_id      TEXT,
    pos_location_id TEXT
);

-- Versioned JSON blobs; a new row per save, never updated.
CREATE TABLE IF NOT EXISTS policy_settings (
    org_id         TEXT NOT NULL REFERENCES orgs(org_id),
    family         TEXT NOT NULL,   -- 'comp' | 'labor' | 'procurement' | 'escalation'
    version        INTEGER NOT NULL,
    settings_json  TEXT NOT NULL,
    effective_from TEXT NOT NULL,   -- RFC 3339 UTC
    PRIMARY KEY (org_id, family, version)
);

-- ── Facts (written by the POS sync) ────────────────────────────────────────

CREATE TABLE IF NOT EXISTS comp_checks (
    venue_id      TEXT NOT NULL REFERENCES venues(venue_id),
    business_date TEXT NOT NULL,    -- YYYY-MM-DD
    check_id      TEXT NOT NULL,
    check_total   REAL NOT NULL,
    comp_total    REAL NOT NULL,
    comp_reason   TEXT NOT NULL,
    server_name   TEXT,
    approved_by   TEXT,
    PRIMARY KEY (venue_id, business_date, check_id)
);

CREATE TABLE IF NOT EXISTS labor_days (
    venue_id      TEXT NOT NULL REFERENCES venues(venue_id),
    business_date TEXT NOT NULL,
    net_sales     REAL NOT NULL,
    labor_cost    REAL NOT NULL,
    labor_hours   REAL NOT NULL,
    covers        REAL NOT NULL,
    ot_hours      REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (venue_id, business_date)
);

CREATE TABLE IF NOT EXISTS cost_entries (
    venue_id      TEXT NOT NULL REFERENCES venues(venue_id),
    item_id       TEXT NOT NULL,
    item_name     TEXT NOT NULL,
    vendor_id     TEXT,
    business_date TEXT NOT NULL,
    unit_cost     REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS invoice_variances (
    variance_id  TEXT PRIMARY KEY,
    venue_id     TEXT NOT NULL REFERENCES venues(venue_id),
    invoice_id   TEXT NOT NULL,
    vendor_name  TEXT,
    item_name    TEXT,
    variance_usd REAL NOT NULL,
    variance_pct REAL NOT NULL,
    severity     TEXT NOT NULL,     -- 'info' | 'warning' | 'critical'
    invoice_date TEXT NOT NULL,
    resolved     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS inventory_counts (
    count_id   TEXT PRIMARY KEY,
    venue_id   TEXT NOT NULL REFERENCES venues(venue_id),
    counted_on TEXT NOT NULL,
    approved   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS inventory_count_lines (
    count_id    TEXT NOT NULL REFERENCES inventory_counts(count_id),
    item_id     TEXT NOT NULL,
    item_name   TEXT NOT NULL,
    counted_qty REAL NOT NULL,
    PRIMARY KEY (count_id, item_id)
);

CREATE TABLE IF NOT EXISTS inventory_balances (
    venue_id     TEXT NOT NULL REFERENCES venues(venue_id),
    item_id      TEXT NOT NULL,
    expected_qty REAL NOT NULL,
    unit_cost    REAL NOT NULL,
    PRIMARY KEY (venue_id, item_id)
);

CREATE TABLE IF NOT EXISTS recipe_cost_snapshots (
    venue_id      TEXT NOT NULL REFERENCES venues(venue_id),
    recipe_id     TEXT NOT NULL,
    recipe_name   TEXT NOT NULL,
    snapshot_date TEXT NOT NULL,
    cost          REAL NOT NULL,
    PRIMARY KEY (venue_id, recipe_id, snapshot_date)
);

CREATE TABLE IF NOT EXISTS par_levels (
    venue_id      TEXT NOT NULL REFERENCES venues(venue_id),
    item_id       TEXT NOT NULL,
    item_name     TEXT NOT NULL,
    on_hand       REAL NOT NULL,
    reorder_point REAL NOT NULL,
    par_level     REAL NOT NULL,
    PRIMARY KEY (venue_id, item_id)
);

-- ── Enforcement ────────────────────────────────────────────────────────────

-- Evidentiary columns are written once at insert; only the escalation
-- columns and status are ever updated.
CREATE TABLE IF NOT EXISTS violations (
    violation_id          TEXT PRIMARY KEY,
    org_id                TEXT NOT NULL REFERENCES orgs(org_id),
    venue_id              TEXT,
    manager_id            TEXT,
    source_id             TEXT NOT NULL,
    violation_type        TEXT NOT NULL,
    severity              TEXT NOT NULL,
    status                TEXT NOT NULL DEFAULT 'open',
    title                 TEXT NOT NULL,
    description           TEXT NOT NULL,
    business_date         TEXT NOT NULL,
    escalation_level      INTEGER NOT NULL DEFAULT 0,
    recurrence_count      INTEGER NOT NULL DEFAULT 0,
    verification_required INTEGER NOT NULL DEFAULT 0,
    cross_venue           INTEGER NOT NULL DEFAULT 0,
    silence_penalized     INTEGER NOT NULL DEFAULT 0,
    stall_penalized       INTEGER NOT NULL DEFAULT 0,
    last_escalated_on     TEXT,
    policy_snapshot       TEXT NOT NULL,
    policy_version        INTEGER,
    policy_fingerprint    TEXT NOT NULL,
    evidence              TEXT NOT NULL,
    derived_metrics       TEXT NOT NULL,
    estimated_impact_usd  REAL,
    impact_confidence     TEXT,
    impact_inputs         TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL,
    UNIQUE (org_id, source_id)
);

-- Strictly append-only.
CREATE TABLE IF NOT EXISTS violation_events (
    event_id     TEXT PRIMARY KEY,
    violation_id TEXT NOT NULL REFERENCES violations(violation_id),
    kind         TEXT NOT NULL,
    detail       TEXT NOT NULL,
    recorded_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_templates (
    template_id      TEXT PRIMARY KEY,
    org_id           TEXT NOT NULL REFERENCES orgs(org_id),
    violation_type   TEXT NOT NULL,
    severity         TEXT NOT NULL,
    action_type      TEXT NOT NULL,
    message_template TEXT NOT NULL,
    target_template  TEXT NOT NULL,
    enabled          INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS actions (
    action_id        TEXT PRIMARY KEY,
    org_id           TEXT NOT NULL REFERENCES orgs(org_id),
    violation_id     TEXT NOT NULL REFERENCES violations(violation_id),
    template_id      TEXT NOT NULL REFERENCES action_templates(template_id),
    action_type      TEXT NOT NULL,
    message          TEXT NOT NULL,
    target           TEXT NOT NULL,
    execution_status TEXT NOT NULL DEFAULT 'pending',
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scores (
    org_id               TEXT NOT NULL REFERENCES orgs(org_id),
    entity               TEXT NOT NULL,  -- 'manager' | 'venue'
    entity_id            TEXT NOT NULL,
    as_of                TEXT NOT NULL,
    risk_score           REAL NOT NULL,
    open_warning         INTEGER NOT NULL,
    open_critical        INTEGER NOT NULL,
    max_escalation_level INTEGER NOT NULL,
    cross_venue_open     INTEGER NOT NULL,
    oldest_open_days     INTEGER NOT NULL,
    PRIMARY KEY (org_id, entity, entity_id, as_of)
);

CREATE INDEX IF NOT EXISTS venues_org_idx          ON venues(org_id);
CREATE INDEX IF NOT EXISTS cost_entries_item_idx   ON cost_entries(venue_id, business_date);
CREATE INDEX IF NOT EXISTS violations_status_idx   ON violations(org_id, status);
CREATE INDEX IF NOT EXISTS violations_venue_idx    ON violations(venue_id, business_date);
CREATE INDEX IF NOT EXISTS violation_events_vid    ON violation_events(violation_id);
CREATE INDEX IF NOT EXISTS action_templates_match  ON action_templates(org_id, violation_type, severity);

PRAGMA user_version = 1;
";
