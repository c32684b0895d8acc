use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use pma_protocol::TelemetryIngest;

/// SQLite-backed store. Cheap to clone; every call opens its own connection
/// and closes it on scope exit, so there is no pooled state to poison.
#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelemetryRow {
    pub id: i64,
    pub vehicle_id: String,
    pub timestamp: String,
    pub speed: f64,
    pub rpm: f64,
    pub engine_temp: f64,
    pub battery_level: f64,
    pub brake_wear: f64,
    pub tire_pressure_fl: f64,
    pub tire_pressure_fr: f64,
    pub tire_pressure_rl: f64,
    pub tire_pressure_rr: f64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        let db_path = dir.join("pma.sqlite");
        let need_init = !db_path.exists();
        let conn = Connection::open(&db_path)?;
        // Pragmas tuned for async server usage
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Busy timeout (default 5000ms; override with PMA_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("PMA_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        // Cache size: negative = KB units. Default ~= 20MB
        let cache_pages: i64 = std::env::var("PMA_SQLITE_CACHE_PAGES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(-20000);
        let _ = conn.pragma_update(None, "cache_size", cache_pages);
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        if need_init {
            Self::init_schema(&conn)?;
        }
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              email TEXT NOT NULL UNIQUE,
              full_name TEXT NOT NULL,
              role TEXT NOT NULL              -- customer | advisor | manufacturer
            );

            CREATE TABLE IF NOT EXISTS vehicles (
              vin TEXT PRIMARY KEY,
              owner_id INTEGER REFERENCES users(id),
              model_name TEXT NOT NULL,
              year INTEGER,
              license_plate TEXT
            );

            CREATE TABLE IF NOT EXISTS telemetry (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              vehicle_id TEXT NOT NULL REFERENCES vehicles(vin),
              timestamp TEXT NOT NULL,
              speed REAL NOT NULL,
              rpm REAL NOT NULL,
              engine_temp REAL NOT NULL,
              battery_level REAL NOT NULL,
              brake_wear REAL NOT NULL,
              tire_pressure_fl REAL NOT NULL,
              tire_pressure_fr REAL NOT NULL,
              tire_pressure_rl REAL NOT NULL,
              tire_pressure_rr REAL NOT NULL,
              latitude REAL NOT NULL,
              longitude REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_telemetry_vehicle ON telemetry(vehicle_id, id);

            CREATE TABLE IF NOT EXISTS service_bookings (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              vehicle_id TEXT NOT NULL REFERENCES vehicles(vin),
              booking_date TEXT NOT NULL,
              service_type TEXT NOT NULL,     -- maintenance | repair | inspection
              status TEXT NOT NULL,           -- pending | confirmed | completed | cancelled
              notes TEXT,
              created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bookings_vehicle ON service_bookings(vehicle_id);

            CREATE TABLE IF NOT EXISTS defects (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              vehicle_model TEXT NOT NULL,
              component TEXT NOT NULL,
              defect_type TEXT,
              description TEXT,
              severity TEXT NOT NULL,         -- low | medium | high | critical
              status TEXT NOT NULL,           -- open | investigating | resolved
              detected_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_defects_model ON defects(vehicle_model);

            -- Append-only ledger of permission gate decisions
            CREATE TABLE IF NOT EXISTS audit_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              time TEXT NOT NULL,
              agent_name TEXT NOT NULL,
              action TEXT NOT NULL,
              resource TEXT NOT NULL,
              parameters TEXT NOT NULL,
              result TEXT NOT NULL,           -- ALLOWED | BLOCKED
              risk_level TEXT NOT NULL,       -- LOW | HIGH
              reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log(time);
            CREATE INDEX IF NOT EXISTS idx_audit_agent ON audit_log(agent_name);

            -- Per-session conversational history for the master router
            CREATE TABLE IF NOT EXISTS chat_messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id TEXT NOT NULL,
              role TEXT NOT NULL,             -- user | assistant
              content TEXT NOT NULL,
              created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_session ON chat_messages(session_id, id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------- Telemetry ----------------

    /// Persist one reading, stamping the server clock when the payload
    /// carries no timestamp. Returns the stored row.
    pub fn insert_telemetry(&self, t: &TelemetryIngest) -> Result<TelemetryRow> {
        let conn = self.conn()?;
        let ts = t
            .timestamp
            .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_else(now_rfc3339);
        conn.execute(
            "INSERT INTO telemetry(vehicle_id,timestamp,speed,rpm,engine_temp,battery_level,brake_wear,\
             tire_pressure_fl,tire_pressure_fr,tire_pressure_rl,tire_pressure_rr,latitude,longitude) \
             VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?)",
            params![
                t.vehicle_id,
                ts,
                t.speed,
                t.rpm,
                t.engine_temp,
                t.battery_level,
                t.brake_wear,
                t.tire_pressure_fl,
                t.tire_pressure_fr,
                t.tire_pressure_rl,
                t.tire_pressure_rr,
                t.latitude,
                t.longitude,
            ],
        )?;
        Ok(TelemetryRow {
            id: conn.last_insert_rowid(),
            vehicle_id: t.vehicle_id.clone(),
            timestamp: ts,
            speed: t.speed,
            rpm: t.rpm,
            engine_temp: t.engine_temp,
            battery_level: t.battery_level,
            brake_wear: t.brake_wear,
            tire_pressure_fl: t.tire_pressure_fl,
            tire_pressure_fr: t.tire_pressure_fr,
            tire_pressure_rl: t.tire_pressure_rl,
            tire_pressure_rr: t.tire_pressure_rr,
            latitude: t.latitude,
            longitude: t.longitude,
        })
    }

    fn telemetry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelemetryRow> {
        Ok(TelemetryRow {
            id: row.get(0)?,
            vehicle_id: row.get(1)?,
            timestamp: row.get(2)?,
            speed: row.get(3)?,
            rpm: row.get(4)?,
            engine_temp: row.get(5)?,
            battery_level: row.get(6)?,
            brake_wear: row.get(7)?,
            tire_pressure_fl: row.get(8)?,
            tire_pressure_fr: row.get(9)?,
            tire_pressure_rl: row.get(10)?,
            tire_pressure_rr: row.get(11)?,
            latitude: row.get(12)?,
            longitude: row.get(13)?,
        })
    }

    pub fn latest_telemetry_for(&self, vehicle_id: &str) -> Result<Option<TelemetryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,vehicle_id,timestamp,speed,rpm,engine_temp,battery_level,brake_wear,\
             tire_pressure_fl,tire_pressure_fr,tire_pressure_rl,tire_pressure_rr,latitude,longitude \
             FROM telemetry WHERE vehicle_id=? ORDER BY id DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row([vehicle_id], |r| Self::telemetry_from_row(r))
            .optional()?;
        Ok(row)
    }

    pub fn list_telemetry_for(&self, vehicle_id: &str, limit: i64) -> Result<Vec<TelemetryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,vehicle_id,timestamp,speed,rpm,engine_temp,battery_level,brake_wear,\
             tire_pressure_fl,tire_pressure_fr,tire_pressure_rl,tire_pressure_rr,latitude,longitude \
             FROM telemetry WHERE vehicle_id=? ORDER BY id DESC LIMIT ?",
        )?;
        let mut rows = stmt.query(params![vehicle_id, limit])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(Self::telemetry_from_row(r)?);
        }
        Ok(out)
    }

    // ---------------- Users ----------------

    pub fn insert_user(&self, email: &str, full_name: &str, role: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users(email,full_name,role) VALUES(?,?,?)",
            params![email, full_name, role],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id,email,full_name,role FROM users WHERE id=? LIMIT 1")?;
        let row = stmt
            .query_row([id], |r| {
                Ok(UserRow {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    full_name: r.get(2)?,
                    role: r.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    // ---------------- Service bookings ----------------

    pub fn insert_booking(
        &self,
        vehicle_id: &str,
        booking_date: &str,
        service_type: &str,
        status: &str,
        notes: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO service_bookings(vehicle_id,booking_date,service_type,status,notes,created) \
             VALUES(?,?,?,?,?,?)",
            params![vehicle_id, booking_date, service_type, status, notes, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_bookings(&self, limit: i64) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,vehicle_id,booking_date,service_type,status,notes,created \
             FROM service_bookings ORDER BY id DESC LIMIT ?",
        )?;
        let mut rows = stmt.query([limit])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(serde_json::json!({
                "id": r.get::<_, i64>(0)?,
                "vehicle_id": r.get::<_, String>(1)?,
                "booking_date": r.get::<_, String>(2)?,
                "service_type": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "notes": r.get::<_, Option<String>>(5)?,
                "created": r.get::<_, String>(6)?,
            }));
        }
        Ok(out)
    }

    pub fn get_booking(&self, id: i64) -> Result<Option<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,vehicle_id,booking_date,service_type,status,notes,created \
             FROM service_bookings WHERE id=? LIMIT 1",
        )?;
        let row = stmt
            .query_row([id], |r| {
                Ok(serde_json::json!({
                    "id": r.get::<_, i64>(0)?,
                    "vehicle_id": r.get::<_, String>(1)?,
                    "booking_date": r.get::<_, String>(2)?,
                    "service_type": r.get::<_, String>(3)?,
                    "status": r.get::<_, String>(4)?,
                    "notes": r.get::<_, Option<String>>(5)?,
                    "created": r.get::<_, String>(6)?,
                }))
            })
            .optional()?;
        Ok(row)
    }

    // ---------------- Defects ----------------

    pub fn insert_defect(
        &self,
        vehicle_model: &str,
        component: &str,
        defect_type: Option<&str>,
        description: Option<&str>,
        severity: &str,
        status: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO defects(vehicle_model,component,defect_type,description,severity,status,detected_at) \
             VALUES(?,?,?,?,?,?,?)",
            params![vehicle_model, component, defect_type, description, severity, status, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Defect counts grouped by component, optionally filtered to one vehicle
    /// model. Ordered worst-first so prompt text stays stable across runs.
    pub fn defect_counts_by_component(&self, model: Option<&str>) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        if let Some(m) = model {
            let mut stmt = conn.prepare(
                "SELECT component, COUNT(id) AS n FROM defects WHERE vehicle_model=? \
                 GROUP BY component ORDER BY n DESC, component ASC",
            )?;
            let mut rows = stmt.query([m])?;
            while let Some(r) = rows.next()? {
                out.push((r.get::<_, String>(0)?, r.get::<_, i64>(1)?));
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT component, COUNT(id) AS n FROM defects \
                 GROUP BY component ORDER BY n DESC, component ASC",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(r) = rows.next()? {
                out.push((r.get::<_, String>(0)?, r.get::<_, i64>(1)?));
            }
        }
        Ok(out)
    }

    // ---------------- Audit ledger ----------------

    #[allow(clippy::too_many_arguments)]
    pub fn append_audit(
        &self,
        agent_name: &str,
        action: &str,
        resource: &str,
        parameters: &serde_json::Value,
        result: &str,
        risk_level: &str,
        reason: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let params_s = serde_json::to_string(parameters).unwrap_or("{}".to_string());
        conn.execute(
            "INSERT INTO audit_log(time,agent_name,action,resource,parameters,result,risk_level,reason) \
             VALUES(?,?,?,?,?,?,?,?)",
            params![now_rfc3339(), agent_name, action, resource, params_s, result, risk_level, reason],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_audit(&self, limit: i64) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,time,agent_name,action,resource,parameters,result,risk_level,reason \
             FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;
        let mut rows = stmt.query([limit])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let params_s: String = r.get(5)?;
            let params_v =
                serde_json::from_str::<serde_json::Value>(&params_s).unwrap_or(serde_json::json!({}));
            out.push(serde_json::json!({
                "id": r.get::<_, i64>(0)?,
                "time": r.get::<_, String>(1)?,
                "agent_name": r.get::<_, String>(2)?,
                "action": r.get::<_, String>(3)?,
                "resource": r.get::<_, String>(4)?,
                "parameters": params_v,
                "result": r.get::<_, String>(6)?,
                "risk_level": r.get::<_, String>(7)?,
                "reason": r.get::<_, Option<String>>(8)?,
            }));
        }
        Ok(out)
    }

    // ---------------- Chat history ----------------

    pub fn append_chat_message(&self, session_id: &str, role: &str, content: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_messages(session_id,role,content,created) VALUES(?,?,?,?)",
            params![session_id, role, content, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Last `limit` turns for a session, oldest first for prompt replay.
    pub fn recent_chat_messages(&self, session_id: &str, limit: i64) -> Result<Vec<ChatTurn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT role,content FROM chat_messages WHERE session_id=? ORDER BY id DESC LIMIT ?",
        )?;
        let mut rows = stmt.query(params![session_id, limit])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(ChatTurn {
                role: r.get(0)?,
                content: r.get(1)?,
            });
        }
        out.reverse();
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn insert_telemetry_async(&self, t: &TelemetryIngest) -> Result<TelemetryRow> {
        let k = self.clone();
        let t = t.clone();
        tokio::task::spawn_blocking(move || k.insert_telemetry(&t))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn latest_telemetry_for_async(&self, vehicle_id: &str) -> Result<Option<TelemetryRow>> {
        let k = self.clone();
        let v = vehicle_id.to_string();
        tokio::task::spawn_blocking(move || k.latest_telemetry_for(&v))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_telemetry_for_async(
        &self,
        vehicle_id: &str,
        limit: i64,
    ) -> Result<Vec<TelemetryRow>> {
        let k = self.clone();
        let v = vehicle_id.to_string();
        tokio::task::spawn_blocking(move || k.list_telemetry_for(&v, limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_user_async(&self, id: i64) -> Result<Option<UserRow>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.get_user(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn insert_booking_async(
        &self,
        vehicle_id: &str,
        booking_date: &str,
        service_type: &str,
        status: &str,
        notes: &str,
    ) -> Result<i64> {
        let k = self.clone();
        let vehicle = vehicle_id.to_string();
        let date = booking_date.to_string();
        let sty = service_type.to_string();
        let st = status.to_string();
        let notes = notes.to_string();
        tokio::task::spawn_blocking(move || k.insert_booking(&vehicle, &date, &sty, &st, &notes))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_bookings_async(&self, limit: i64) -> Result<Vec<serde_json::Value>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_bookings(limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn defect_counts_by_component_async(
        &self,
        model: Option<&str>,
    ) -> Result<Vec<(String, i64)>> {
        let k = self.clone();
        let m = model.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || k.defect_counts_by_component(m.as_deref()))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn append_audit_async(
        &self,
        agent_name: &str,
        action: &str,
        resource: &str,
        parameters: &serde_json::Value,
        result: &str,
        risk_level: &str,
        reason: Option<&str>,
    ) -> Result<i64> {
        let k = self.clone();
        let agent = agent_name.to_string();
        let action = action.to_string();
        let resource = resource.to_string();
        let parameters = parameters.clone();
        let result = result.to_string();
        let risk = risk_level.to_string();
        let reason = reason.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || {
            k.append_audit(
                &agent,
                &action,
                &resource,
                &parameters,
                &result,
                &risk,
                reason.as_deref(),
            )
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_audit_async(&self, limit: i64) -> Result<Vec<serde_json::Value>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_audit(limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn append_chat_message_async(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<i64> {
        let k = self.clone();
        let sid = session_id.to_string();
        let role = role.to_string();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || k.append_chat_message(&sid, &role, &content))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn recent_chat_messages_async(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatTurn>> {
        let k = self.clone();
        let sid = session_id.to_string();
        tokio::task::spawn_blocking(move || k.recent_chat_messages(&sid, limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}
