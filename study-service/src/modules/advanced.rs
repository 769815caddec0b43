//! Sync queue, study groups and usage analytics.

use super::FeatureModule;
use crate::error::StorageError;
use crate::models::{now_millis, now_rfc3339};
use crate::storage::{entry, update_array, KeyValueStore};
use async_trait::async_trait;
use chrono::{Local, TimeZone, Timelike};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MAX_EVENTS_IN_MEMORY: usize = 1000;
const MAX_EVENTS_PERSISTED: usize = 100;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const STUDY_EVENT_TYPES: [&str; 4] = [
    "context_menu_used",
    "keyboard_shortcut_used",
    "flashcard_created",
    "quiz_generated",
];

fn generate_user_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("user_{}_{}", now_millis(), suffix)
}

async fn stored_user_id(kv: &dyn KeyValueStore) -> Result<Option<String>, StorageError> {
    let settings = kv.get(&["settings"]).await?;
    Ok(settings
        .get("settings")
        .and_then(|s| s.get("userId"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

async fn load_array(kv: &dyn KeyValueStore, key: &str) -> Result<Vec<Value>, StorageError> {
    let mut result = kv.get(&[key]).await?;
    Ok(match result.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

async fn append(kv: &dyn KeyValueStore, key: &str, item: Value) -> Result<(), StorageError> {
    update_array(kv, key, |items| {
        items.push(item);
        Ok(())
    })
    .await
}

// Realtime sync

#[derive(Debug, Clone)]
struct SyncItem {
    data_type: String,
    data: Value,
    queued_at: i64,
}

/// Queues sync payloads while offline and drains them on reconnect
pub struct RealtimeSync {
    online: AtomicBool,
    queue: Mutex<Vec<SyncItem>>,
}

impl Default for RealtimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeSync {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip connectivity; coming back online drains the queue
    pub async fn set_online(&self, online: bool) -> usize {
        self.online.store(online, Ordering::SeqCst);
        if online {
            self.process_sync_queue().await
        } else {
            0
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn sync_data(&self, data_type: &str, data: Value) -> Value {
        if !self.is_online() {
            let mut queue = self.queue.lock().await;
            queue.push(SyncItem {
                data_type: data_type.to_string(),
                data,
                queued_at: now_millis(),
            });
            return json!({ "queued": true, "queueLength": queue.len() });
        }

        debug!("Syncing {} ({} bytes)", data_type, data.to_string().len());
        json!({
            "success": true,
            "syncedAt": now_rfc3339(),
            "dataType": data_type,
        })
    }

    /// Push every queued item; returns how many were drained
    pub async fn process_sync_queue(&self) -> usize {
        if !self.is_online() {
            return 0;
        }

        let pending = std::mem::take(&mut *self.queue.lock().await);
        if pending.is_empty() {
            return 0;
        }

        info!("Processing {} queued sync items", pending.len());
        for item in &pending {
            debug!(
                "Syncing queued {} from {}",
                item.data_type, item.queued_at
            );
            self.sync_data(&item.data_type, item.data.clone()).await;
        }
        pending.len()
    }
}

#[async_trait]
impl FeatureModule for RealtimeSync {
    fn name(&self) -> &'static str {
        "realtime sync"
    }
}

// Social

/// Points awarded per study activity
pub fn activity_points(activity: &str) -> u32 {
    match activity {
        "summarize" => 10,
        "generate_flashcard" => 15,
        "create_quiz" => 20,
        "watch_video" => 5,
        "complete_quiz" => 25,
        _ => 5,
    }
}

fn generate_group_code() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase()
}

fn timeframe_window_ms(timeframe: &str) -> Option<i64> {
    match timeframe {
        "daily" => Some(DAY_MS),
        "weekly" => Some(7 * DAY_MS),
        "monthly" => Some(30 * DAY_MS),
        _ => None,
    }
}

pub struct SocialFeatures {
    kv: Arc<dyn KeyValueStore>,
    user_id: Mutex<String>,
    current_group: Mutex<Option<Value>>,
}

impl SocialFeatures {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            user_id: Mutex::new(generate_user_id()),
            current_group: Mutex::new(None),
        }
    }

    pub async fn user_id(&self) -> String {
        self.user_id.lock().await.clone()
    }

    pub async fn current_group(&self) -> Option<Value> {
        self.current_group.lock().await.clone()
    }

    async fn remember_group(&self, group: &Value) -> Result<(), StorageError> {
        append(self.kv.as_ref(), "studyGroups", group.clone()).await?;
        *self.current_group.lock().await = Some(group.clone());
        Ok(())
    }

    pub async fn join_study_group(&self, group_id: &str, code: &str) -> Result<Value, StorageError> {
        let group = json!({
            "id": group_id,
            "name": format!("Study Group {}", group_id),
            "members": [self.user_id().await],
            "code": code,
            "joinedAt": now_rfc3339(),
        });
        self.remember_group(&group).await?;
        info!("Joined study group {}", group_id);
        Ok(group)
    }

    pub async fn create_study_group(&self, group_data: &Value) -> Result<Value, StorageError> {
        let user_id = self.user_id().await;
        let group = json!({
            "id": now_millis().to_string(),
            "name": group_data.get("name").cloned().unwrap_or(Value::Null),
            "description": group_data.get("description").cloned().unwrap_or(Value::Null),
            "code": generate_group_code(),
            "creator": user_id,
            "members": [user_id],
            "createdAt": now_rfc3339(),
        });
        self.remember_group(&group).await?;
        Ok(group)
    }

    /// Rank users by points earned inside the timeframe (`daily`, `weekly`,
    /// `monthly`; anything else counts all history)
    pub async fn get_leaderboard(&self, timeframe: Option<&str>) -> Result<Value, StorageError> {
        let timeframe = timeframe.unwrap_or("weekly");
        let cutoff = timeframe_window_ms(timeframe).map(|w| now_millis() - w);
        let me = self.user_id().await;

        let mut totals: HashMap<String, u64> = HashMap::new();
        for progress in load_array(self.kv.as_ref(), "userProgress").await? {
            let recent = match (cutoff, progress["timestamp"].as_i64()) {
                (Some(cutoff), Some(ts)) => ts >= cutoff,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !recent {
                continue;
            }
            if let Some(user) = progress["userId"].as_str() {
                *totals.entry(user.to_string()).or_default() += progress["points"].as_u64().unwrap_or(0);
            }
        }

        let mut ranked: Vec<(String, u64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let data: Vec<Value> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (user_id, points))| {
                let name = if user_id == me { "You".to_string() } else { user_id.clone() };
                json!({ "userId": user_id, "name": name, "points": points, "rank": i + 1 })
            })
            .collect();

        Ok(json!({
            "timeframe": timeframe,
            "data": data,
            "updatedAt": now_rfc3339(),
        }))
    }

    pub async fn update_user_progress(
        &self,
        activity: &str,
        timestamp: i64,
    ) -> Result<Value, StorageError> {
        let progress = json!({
            "userId": self.user_id().await,
            "type": activity,
            "timestamp": timestamp,
            "points": activity_points(activity),
        });
        append(self.kv.as_ref(), "userProgress", progress.clone()).await?;
        Ok(progress)
    }
}

#[async_trait]
impl FeatureModule for SocialFeatures {
    fn name(&self) -> &'static str {
        "social features"
    }

    async fn initialize(&self) -> Result<(), String> {
        if let Some(id) = stored_user_id(self.kv.as_ref())
            .await
            .map_err(|e| e.to_string())?
        {
            *self.user_id.lock().await = id;
        }
        Ok(())
    }
}

// Analytics

pub struct AnalyticsEngine {
    kv: Arc<dyn KeyValueStore>,
    user_id: Mutex<String>,
    session_id: String,
    events: Mutex<Vec<Value>>,
}

impl AnalyticsEngine {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            user_id: Mutex::new(generate_user_id()),
            session_id: now_millis().to_string(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Record an event; persistence failures are logged, never returned
    pub async fn track_event(&self, event: Value) {
        let mut full = match event {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("type".to_string(), other);
                map
            }
        };
        full.insert("userId".to_string(), json!(self.user_id.lock().await.clone()));
        full.insert("sessionId".to_string(), json!(self.session_id));
        if !full.get("timestamp").map(Value::is_i64).unwrap_or(false) {
            full.insert("timestamp".to_string(), json!(now_millis()));
        }

        // Held through the write so snapshots land in event order
        let mut events = self.events.lock().await;
        events.push(Value::Object(full));
        if events.len() > MAX_EVENTS_IN_MEMORY {
            let excess = events.len() - MAX_EVENTS_IN_MEMORY;
            events.drain(..excess);
        }
        let start = events.len().saturating_sub(MAX_EVENTS_PERSISTED);
        let persisted = events[start..].to_vec();

        if let Err(e) = self
            .kv
            .set(entry("analyticsEvents", Value::Array(persisted)))
            .await
        {
            warn!("Failed to persist analytics events: {}", e);
        }
    }

    pub async fn generate_insights(&self) -> Value {
        let events = self.events.lock().await.clone();
        insights_at(&events, now_millis())
    }

    pub async fn export_analytics(&self) -> Value {
        let events = self.events.lock().await.clone();
        json!({
            "userId": self.user_id.lock().await.clone(),
            "insights": insights_at(&events, now_millis()),
            "events": events,
            "exportedAt": now_rfc3339(),
        })
    }

    pub async fn clear_analytics(&self) -> Result<(), StorageError> {
        self.events.lock().await.clear();
        self.kv.set(entry("analyticsEvents", json!([]))).await
    }
}

#[async_trait]
impl FeatureModule for AnalyticsEngine {
    fn name(&self) -> &'static str {
        "analytics engine"
    }

    async fn initialize(&self) -> Result<(), String> {
        let kv = self.kv.as_ref();
        if let Some(id) = stored_user_id(kv).await.map_err(|e| e.to_string())? {
            *self.user_id.lock().await = id;
        }
        let existing = load_array(kv, "analyticsEvents")
            .await
            .map_err(|e| e.to_string())?;
        debug!("Loaded {} analytics events", existing.len());
        *self.events.lock().await = existing;
        Ok(())
    }
}

fn count_by_type<'a>(events: impl Iterator<Item = &'a Value>) -> BTreeMap<String, usize> {
    let mut grouped = BTreeMap::new();
    for event in events {
        let kind = event["type"].as_str().unwrap_or("unknown").to_string();
        *grouped.entry(kind).or_insert(0) += 1;
    }
    grouped
}

fn local_time(timestamp: i64) -> Option<chrono::DateTime<Local>> {
    Local.timestamp_millis_opt(timestamp).single()
}

/// Aggregate view of the events as of `now` (epoch millis)
pub fn insights_at(events: &[Value], now: i64) -> Value {
    let recent: Vec<&Value> = events
        .iter()
        .filter(|e| e["timestamp"].as_i64().map(|ts| now - ts < 7 * DAY_MS).unwrap_or(false))
        .collect();

    let mut day_counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in &recent {
        if let Some(time) = event["timestamp"].as_i64().and_then(local_time) {
            *day_counts.entry(time.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        }
    }
    let most_active_day = day_counts
        .iter()
        .fold(None::<(&String, usize)>, |best, (day, &count)| match best {
            Some((_, max)) if max >= count => best,
            _ => Some((day, count)),
        })
        .map(|(day, _)| day.clone());

    let study_events: Vec<&Value> = events
        .iter()
        .filter(|e| {
            e["type"]
                .as_str()
                .map(|t| STUDY_EVENT_TYPES.contains(&t))
                .unwrap_or(false)
        })
        .collect();

    let mut hours = [0usize; 24];
    for event in &study_events {
        if let Some(time) = event["timestamp"].as_i64().and_then(local_time) {
            hours[time.hour() as usize] += 1;
        }
    }
    let max = hours.iter().copied().max().unwrap_or(0);
    let most_active_hour = hours.iter().position(|&c| c == max).unwrap_or(0);

    json!({
        "totalEvents": events.len(),
        "eventsByType": count_by_type(events.iter()),
        "userActivity": {
            "totalRecentEvents": recent.len(),
            "averageDailyEvents": recent.len() as f64 / 7.0,
            "mostActiveDay": most_active_day,
        },
        "studyPatterns": {
            "totalStudyEvents": study_events.len(),
            "preferredMethods": count_by_type(study_events.iter().copied()),
            "studyTimes": {
                "mostActiveHour": most_active_hour,
                "hourDistribution": hours.to_vec(),
            },
        },
        "generatedAt": now_rfc3339(),
    })
}
