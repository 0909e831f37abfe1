//! Automation - ルールエンジンとテンプレートライブラリ
//!
//! # フロー（イベント駆動）
//! 1. 分類済みイベントを受け取る
//! 2. 有効なルールごとに、日付が変わっていれば送信カウントをリセット
//! 3. trigger が一致し、日次クォータが残っていればテンプレートを描画
//! 4. `template-response` タスクを `now + delay_minutes` に予約
//! 5. 送信カウントを 1 増やす
//!
//! `time_based` ルールはイベントでは発火せず、定期 sweep が cron の
//! 発火時刻をまたいだときに 1 回だけ発火します。
//!
//! 評価は 1 本の mutex で直列化されるので、同時に届いたイベントで
//! クォータを超えることはありません。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::manager::TaskManager;
use super::repository::Repository;
use crate::domain::{
    AutomationRule, ClassifiedEvent, CronSchedule, HeraldError, NewRule, NewTemplate, Result,
    RuleId, TaskId, Template, TemplateId, Trigger, Variables,
};
use crate::ports::{Clock, IdGenerator, RecordStore};
use crate::typed::{TaskPayload, TemplateResponse};

/// Placeholder value when an event carries no action items.
pub const NO_ACTIONS: &str = "no actions identified";

// ========================================
// TemplateLibrary
// ========================================

pub struct TemplateLibrary {
    templates: Repository<Template>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl TemplateLibrary {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            templates: Repository::new(store),
            ids,
            clock,
        }
    }

    pub async fn add(&self, new: NewTemplate) -> Result<TemplateId> {
        if new.name.trim().is_empty() {
            return Err(HeraldError::validation("template name must not be empty"));
        }
        if new.subject_template.is_empty() && new.body_template.is_empty() {
            return Err(HeraldError::validation(format!(
                "template '{}' has neither subject nor body",
                new.name
            )));
        }
        let template = new.into_template(self.ids.generate_template_id(), self.clock.now());
        let id = template.id;
        self.templates.insert(template).await?;
        debug!(template_id = %id, "template added");
        Ok(id)
    }

    pub async fn get(&self, id: TemplateId) -> Result<Option<Template>> {
        self.templates.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Template>> {
        self.templates.list().await
    }

    pub async fn remove(&self, id: TemplateId) -> Result<bool> {
        self.templates.delete(id).await
    }

    /// イベントに最も合うテンプレートを選ぶ
    ///
    /// classification が一致すれば +2、urgency が一致すれば +1。
    /// タグが付いていて一致しないテンプレートは候補から外す。タグ無しは
    /// 0 点の汎用候補。同点なら先に作られたもの。
    pub async fn suggest(&self, event: &ClassifiedEvent) -> Result<Option<Template>> {
        let mut best: Option<(u32, Template)> = None;
        for template in self.templates.list().await? {
            let Some(score) = match_score(&template, event) else {
                continue;
            };
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, template));
            }
        }
        Ok(best.map(|(_, t)| t))
    }
}

fn match_score(template: &Template, event: &ClassifiedEvent) -> Option<u32> {
    let mut score = 0;
    match &template.classification {
        Some(c) if *c == event.classification => score += 2,
        Some(_) => return None,
        None => {}
    }
    match &template.urgency {
        Some(u) if *u == event.urgency => score += 1,
        Some(_) => return None,
        None => {}
    }
    Some(score)
}

// ========================================
// RuleEngine
// ========================================

/// RuleEngine はイベントとルールを突き合わせて応答タスクを生成する
///
/// # 使用例
/// ```ignore
/// let template = engine.templates().add(NewTemplate::new("ack", "Re: {subject}", "Hi {sender_name}")).await?;
/// engine.add_rule(NewRule::new("billing", Trigger::ClassificationEquals,
///     RuleConditions::equals("billing"), template)).await?;
/// let spawned = engine.evaluate(&event).await?;
/// ```
pub struct RuleEngine {
    rules: Repository<AutomationRule>,
    templates: TemplateLibrary,
    manager: Arc<TaskManager>,
    ids: Arc<dyn IdGenerator>,
    evaluation: Mutex<()>,
}

impl RuleEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        manager: Arc<TaskManager>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let clock = Arc::clone(manager.clock());
        Self {
            rules: Repository::new(Arc::clone(&store)),
            templates: TemplateLibrary::new(store, Arc::clone(&ids), clock),
            manager,
            ids,
            evaluation: Mutex::new(()),
        }
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    fn now(&self) -> DateTime<Utc> {
        self.manager.clock().now()
    }

    // ----------------------------------------
    // ルール管理
    // ----------------------------------------

    /// 条件とテンプレート参照を検証してから保存する
    pub async fn add_rule(&self, new: NewRule) -> Result<RuleId> {
        new.validate()?;
        if self.templates.get(new.template_id).await?.is_none() {
            return Err(HeraldError::validation(format!(
                "rule '{}' references unknown template {}",
                new.name, new.template_id
            )));
        }
        let rule = new.into_rule(self.ids.generate_rule_id(), self.now());
        let id = rule.id;
        self.rules.insert(rule).await?;
        info!(rule_id = %id, "rule added");
        Ok(id)
    }

    pub async fn get_rule(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        self.rules.get(id).await
    }

    pub async fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        self.rules.list().await
    }

    pub async fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<AutomationRule> {
        self.rules
            .update(id, |r| {
                r.enabled = enabled;
                Ok(())
            })
            .await
    }

    pub async fn remove_rule(&self, id: RuleId) -> Result<bool> {
        self.rules.delete(id).await
    }

    // ----------------------------------------
    // 評価
    // ----------------------------------------

    /// イベントを全ルールに当てて、生成したタスクの ID を返す
    ///
    /// 1 ルールにつき 1 イベントで最大 1 タスク（キーワードが複数
    /// 当たっても 1 つ）。
    pub async fn evaluate(&self, event: &ClassifiedEvent) -> Result<Vec<TaskId>> {
        let _serial = self.evaluation.lock().await;
        let now = self.now();
        let today = now.date_naive();
        let mut spawned = Vec::new();

        for mut rule in self.rules.list().await? {
            if !rule.enabled {
                continue;
            }
            if rule.roll_over(today) {
                self.rules
                    .update(rule.id, |r| {
                        r.roll_over(today);
                        Ok(())
                    })
                    .await?;
            }
            if !rule.matches(event) {
                continue;
            }
            if !rule.has_quota() {
                warn!(
                    rule_id = %rule.id,
                    sent = rule.daily_send_count,
                    max = rule.max_daily_sends,
                    "daily quota exhausted"
                );
                continue;
            }

            let response = Response {
                vars: event_variables(event, now),
                recipient: Some(event.sender_email()),
                in_reply_to: Some(event.subject.clone()),
            };
            match self.respond(&rule, response, now).await {
                Ok(task_id) => {
                    self.rules
                        .update(rule.id, |r| {
                            r.roll_over(today);
                            r.record_send();
                            Ok(())
                        })
                        .await?;
                    info!(rule_id = %rule.id, task_id = %task_id, "rule fired");
                    spawned.push(task_id);
                }
                Err(e) => error!(rule_id = %rule.id, error = %e, "automated response failed"),
            }
        }
        Ok(spawned)
    }

    /// `time_based` ルールの定期評価
    ///
    /// 前回の発火（無ければ作成時刻）から今までの間に cron の発火時刻が
    /// あれば 1 回だけ発火する。クォータ切れでも発火時刻は消費する。
    pub async fn sweep(&self) -> Result<Vec<TaskId>> {
        let _serial = self.evaluation.lock().await;
        let now = self.now();
        let today = now.date_naive();
        let mut spawned = Vec::new();

        for mut rule in self.rules.list().await? {
            if !rule.enabled || rule.trigger != Trigger::TimeBased {
                continue;
            }
            let Some(expr) = rule.conditions.schedule.as_deref() else {
                continue;
            };
            let schedule = match CronSchedule::parse(expr) {
                Ok(s) => s,
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "unusable schedule");
                    continue;
                }
            };
            let since = rule.last_triggered.unwrap_or(rule.created_at);
            if !schedule.fires_between(since, now) {
                continue;
            }

            rule.roll_over(today);
            let task_id = if rule.has_quota() {
                let response = Response {
                    vars: clock_variables(&rule, now),
                    recipient: None,
                    in_reply_to: None,
                };
                match self.respond(&rule, response, now).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        error!(rule_id = %rule.id, error = %e, "scheduled response failed");
                        None
                    }
                }
            } else {
                warn!(rule_id = %rule.id, "daily quota exhausted");
                None
            };

            self.rules
                .update(rule.id, |r| {
                    r.roll_over(today);
                    r.last_triggered = Some(now);
                    if task_id.is_some() {
                        r.record_send();
                    }
                    Ok(())
                })
                .await?;
            if let Some(id) = task_id {
                info!(rule_id = %rule.id, task_id = %id, "time-based rule fired");
                spawned.push(id);
            }
        }
        Ok(spawned)
    }

    async fn respond(
        &self,
        rule: &AutomationRule,
        response: Response,
        now: DateTime<Utc>,
    ) -> Result<TaskId> {
        let template = self
            .templates
            .get(rule.template_id)
            .await?
            .ok_or_else(|| HeraldError::NotFound(rule.template_id.to_string()))?;
        let (subject, body) = template.render(&response.vars);

        let payload = TemplateResponse {
            rule_id: rule.id,
            template_id: template.id,
            recipient: response.recipient,
            subject,
            body,
            in_reply_to: response.in_reply_to,
        };
        let send_at = now + ChronoDuration::minutes(i64::from(rule.delay_minutes));
        let new = payload
            .into_new_task(format!("auto_{}", rule.name))?
            .priority(rule.priority)
            .scheduled_at(send_at);
        self.manager.submit(new, now).await
    }

    /// イベントを受けて評価し、`interval` ごとに sweep する
    ///
    /// ストアのエラーはログに残して次のイベント / tick で再試行する。
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ClassifiedEvent>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut events_open = true;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(e) = self.evaluate(&event).await {
                            error!(error = %e, "rule evaluation failed");
                        }
                    }
                    None => {
                        debug!("event channel closed");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "rule sweep failed");
                    }
                }
            }
        }
    }
}

struct Response {
    vars: Variables,
    recipient: Option<String>,
    in_reply_to: Option<String>,
}

fn clock_variables(rule: &AutomationRule, now: DateTime<Utc>) -> Variables {
    Variables::from([
        ("rule_name".to_string(), rule.name.clone()),
        ("current_date".to_string(), now.format("%Y-%m-%d").to_string()),
        ("current_time".to_string(), now.format("%H:%M").to_string()),
    ])
}

/// Template variables derived from an event.
pub fn event_variables(event: &ClassifiedEvent, now: DateTime<Utc>) -> Variables {
    let first_action = event
        .action_items
        .first()
        .map(|a| a.text.clone())
        .unwrap_or_else(|| NO_ACTIONS.to_string());

    Variables::from([
        ("sender_name".to_string(), event.sender_name()),
        ("sender_email".to_string(), event.sender_email()),
        ("subject".to_string(), event.subject.clone()),
        ("classification".to_string(), event.classification.clone()),
        ("urgency".to_string(), event.urgency.clone()),
        ("sentiment".to_string(), event.sentiment.clone()),
        ("current_date".to_string(), now.format("%Y-%m-%d").to_string()),
        ("current_time".to_string(), now.format("%H:%M").to_string()),
        ("action_item".to_string(), first_action),
        ("action_count".to_string(), event.action_items.len().to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::queue::PriorityQueue;
    use crate::config::SchedulerConfig;
    use crate::domain::{ActionItem, Priority, RuleConditions, TaskStatus};
    use crate::impls::InMemoryStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    struct Fixture {
        engine: RuleEngine,
        manager: Arc<TaskManager>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(start()));
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let manager = Arc::new(TaskManager::new(
            Arc::new(Repository::new(Arc::clone(&store))),
            Arc::new(PriorityQueue::new()),
            Arc::clone(&ids),
            clock.clone(),
            &SchedulerConfig::default(),
        ));
        let engine = RuleEngine::new(store, Arc::clone(&manager), ids);
        Fixture {
            engine,
            manager,
            clock,
        }
    }

    fn event() -> ClassifiedEvent {
        ClassifiedEvent {
            sender: "Alice Smith <alice@example.com>".into(),
            subject: "Budget".into(),
            body: "Can we review the Q4 budget?".into(),
            classification: "finance".into(),
            urgency: "high".into(),
            sentiment: "neutral".into(),
            action_items: vec![ActionItem::new("review budget"), ActionItem::new("reply")],
        }
    }

    async fn ack_template(f: &Fixture) -> TemplateId {
        f.engine
            .templates()
            .add(NewTemplate::new(
                "ack",
                "Re: {subject}",
                "Hi {sender_name}, noted: {action_item} ({action_count}). {missing}",
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn matching_rule_spawns_rendered_response() {
        let f = fixture();
        let template = ack_template(&f).await;
        let rule = f
            .engine
            .add_rule(
                NewRule::new(
                    "finance-ack",
                    Trigger::ClassificationEquals,
                    RuleConditions::equals("finance"),
                    template,
                )
                .priority(Priority::High),
            )
            .await
            .unwrap();

        let spawned = f.engine.evaluate(&event()).await.unwrap();
        assert_eq!(spawned.len(), 1);

        let task = f.manager.get_task(spawned[0]).await.unwrap().unwrap();
        assert_eq!(task.task_type.as_str(), TemplateResponse::TYPE);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::High);
        let payload = TemplateResponse::from_payload(&task.payload).unwrap();
        assert_eq!(payload.rule_id, rule);
        assert_eq!(payload.recipient.as_deref(), Some("alice@example.com"));
        assert_eq!(payload.subject, "Re: Budget");
        assert_eq!(
            payload.body,
            "Hi Alice Smith, noted: review budget (2). {missing}"
        );

        let stored = f.engine.get_rule(rule).await.unwrap().unwrap();
        assert_eq!(stored.daily_send_count, 1);
    }

    #[tokio::test]
    async fn delay_defers_the_response() {
        let f = fixture();
        let template = ack_template(&f).await;
        f.engine
            .add_rule(
                NewRule::new(
                    "urgent",
                    Trigger::UrgencyEquals,
                    RuleConditions::equals("high"),
                    template,
                )
                .delay_minutes(15),
            )
            .await
            .unwrap();

        let spawned = f.engine.evaluate(&event()).await.unwrap();
        let task = f.manager.get_task(spawned[0]).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.scheduled_time, Some(start() + ChronoDuration::minutes(15)));
        assert!(!f.manager.queue().contains(task.id).await);
    }

    #[tokio::test]
    async fn quota_limits_sends_per_day() {
        let f = fixture();
        let template = ack_template(&f).await;
        let rule = f
            .engine
            .add_rule(
                NewRule::new(
                    "kw",
                    Trigger::KeywordMatch,
                    RuleConditions::keywords(["budget", "q4"]),
                    template,
                )
                .max_daily_sends(1),
            )
            .await
            .unwrap();

        // 2 キーワード一致でも 1 タスク
        assert_eq!(f.engine.evaluate(&event()).await.unwrap().len(), 1);
        assert!(f.engine.evaluate(&event()).await.unwrap().is_empty());

        f.clock.advance(ChronoDuration::days(1));
        assert_eq!(f.engine.evaluate(&event()).await.unwrap().len(), 1);
        let stored = f.engine.get_rule(rule).await.unwrap().unwrap();
        assert_eq!(stored.daily_send_count, 1);
        assert_eq!(stored.last_reset_date, (start() + ChronoDuration::days(1)).date_naive());
    }

    #[tokio::test]
    async fn disabled_and_non_matching_rules_do_nothing() {
        let f = fixture();
        let template = ack_template(&f).await;
        let rule = f
            .engine
            .add_rule(NewRule::new(
                "neg",
                Trigger::SentimentEquals,
                RuleConditions::equals("negative"),
                template,
            ))
            .await
            .unwrap();
        assert!(f.engine.evaluate(&event()).await.unwrap().is_empty());

        f.engine.set_enabled(rule, false).await.unwrap();
        let mut negative = event();
        negative.sentiment = "negative".into();
        assert!(f.engine.evaluate(&negative).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_template_is_rejected() {
        let f = fixture();
        let missing = f.engine.ids.generate_template_id();
        let err = f
            .engine
            .add_rule(NewRule::new(
                "x",
                Trigger::FollowUpClassification,
                RuleConditions::default(),
                missing,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::Validation(_)));
    }

    #[tokio::test]
    async fn time_based_rule_fires_once_per_window() {
        let f = fixture();
        let template = f
            .engine
            .templates()
            .add(NewTemplate::new(
                "morning",
                "Daily summary {current_date}",
                "{rule_name} at {current_time}",
            ))
            .await
            .unwrap();
        f.engine
            .add_rule(NewRule::new(
                "morning",
                Trigger::TimeBased,
                RuleConditions::schedule("30 9 * * *"),
                template,
            ))
            .await
            .unwrap();

        // イベントでは発火しない
        assert!(f.engine.evaluate(&event()).await.unwrap().is_empty());
        assert!(f.engine.sweep().await.unwrap().is_empty());

        f.clock.advance(ChronoDuration::minutes(31));
        let spawned = f.engine.sweep().await.unwrap();
        assert_eq!(spawned.len(), 1);
        assert!(f.engine.sweep().await.unwrap().is_empty());

        let task = f.manager.get_task(spawned[0]).await.unwrap().unwrap();
        let payload = TemplateResponse::from_payload(&task.payload).unwrap();
        assert_eq!(payload.subject, "Daily summary 2026-10-17");
        assert_eq!(payload.body, "morning at 09:31");
        assert_eq!(payload.recipient, None);

        f.clock.advance(ChronoDuration::days(1));
        assert_eq!(f.engine.sweep().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn suggest_prefers_the_most_specific_template() {
        let f = fixture();
        let lib = f.engine.templates();
        let generic = lib
            .add(NewTemplate::new("generic", "Re: {subject}", "Thanks"))
            .await
            .unwrap();
        let finance = lib
            .add(NewTemplate::new("finance", "Re: {subject}", "Finance team").for_classification("finance"))
            .await
            .unwrap();
        let urgent_finance = lib
            .add(
                NewTemplate::new("urgent-finance", "Re: {subject}", "On it")
                    .for_classification("finance")
                    .for_urgency("high"),
            )
            .await
            .unwrap();
        lib.add(NewTemplate::new("legal", "Re", "Legal").for_classification("legal"))
            .await
            .unwrap();

        let best = lib.suggest(&event()).await.unwrap().unwrap();
        assert_eq!(best.id, urgent_finance);

        let mut low = event();
        low.urgency = "low".into();
        assert_eq!(lib.suggest(&low).await.unwrap().unwrap().id, finance);

        let mut other = event();
        other.classification = "social".into();
        assert_eq!(lib.suggest(&other).await.unwrap().unwrap().id, generic);
    }

    #[test]
    fn event_variables_default_when_no_action_items() {
        let mut e = event();
        e.action_items.clear();
        let vars = event_variables(&e, start());
        assert_eq!(vars["action_item"], NO_ACTIONS);
        assert_eq!(vars["action_count"], "0");
        assert_eq!(vars["current_date"], "2026-10-17");
        assert_eq!(vars["current_time"], "09:00");
        assert_eq!(vars["sender_email"], "alice@example.com");
    }
}
