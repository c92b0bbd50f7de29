//! Effective rule value resolution.
//!
//! Resolution collects the active configurations for a rule that are in
//! effect at the requested date and whose scope is compatible with the
//! requested context, ranks them by specificity (count of non-null scope
//! fields; ties broken by most recent update), and falls back to the rule's
//! own value and then its default. The winning raw string is cast once into
//! [RuleValue] and checked against the rule's constraints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use acadra_core::rule_value::{cast_value, RuleValue};
use acadra_core::EngineError;

use super::models::{AcademicRule, RuleConfiguration};
use super::repository::RuleRepository;

/// The (session, program, department) tuple a resolution happens in. Always
/// passed explicitly; components never read an ambient "current session".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    pub session_id: Option<String>,
    pub program_id: Option<String>,
    pub department_id: Option<String>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_program(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    fn cache_key(&self, rule_code: &str, as_of: DateTime<Utc>) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            rule_code,
            self.session_id.as_deref().unwrap_or("*"),
            self.program_id.as_deref().unwrap_or("*"),
            self.department_id.as_deref().unwrap_or("*"),
            as_of.date_naive()
        )
    }
}

/// Shared resolved-value cache. Invalidation is whole-rule: any write to a
/// rule or one of its configurations drops every cached entry for that code.
#[derive(Clone, Default)]
pub struct ResolverCache {
    entries: Arc<Mutex<HashMap<String, RuleValue>>>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<RuleValue> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn put(&self, key: String, value: RuleValue) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value);
        }
    }

    pub fn invalidate_rule(&self, rule_code: &str) {
        let prefix = format!("{}|", rule_code);
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

/// Resolves the effective typed value of a rule in a context. Pure read; the
/// cache is the only state, and only commits invalidate it.
pub struct RuleResolver<R: RuleRepository> {
    repository: Arc<R>,
    cache: ResolverCache,
}

impl<R: RuleRepository> RuleResolver<R> {
    pub fn new(repository: Arc<R>, cache: ResolverCache) -> Self {
        Self { repository, cache }
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    /// Resolve `rule_code` as of `as_of` in `context`.
    pub fn resolve(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
        context: &ResolutionContext,
    ) -> Result<RuleValue, EngineError> {
        self.resolve_inner(rule_code, as_of, context, true)
    }

    /// Resolve, treating an unknown or inactive rule as `default`.
    pub fn resolve_with_default(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
        context: &ResolutionContext,
        default: RuleValue,
    ) -> Result<RuleValue, EngineError> {
        match self.resolve(rule_code, as_of, context) {
            Ok(value) => Ok(value),
            Err(EngineError::NotFound(_)) => Ok(default),
            Err(other) => Err(other),
        }
    }

    fn resolve_inner(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
        context: &ResolutionContext,
        follow_parent: bool,
    ) -> Result<RuleValue, EngineError> {
        let key = context.cache_key(rule_code, as_of);
        if follow_parent {
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }
        }

        let rule = self
            .repository
            .get_rule(rule_code)?
            .ok_or_else(|| EngineError::NotFound(format!("unknown rule '{}'", rule_code)))?;
        if !rule.is_active {
            return Err(EngineError::NotFound(format!(
                "rule '{}' is inactive",
                rule_code
            )));
        }
        if follow_parent {
            self.check_parent_gate(&rule, as_of, context)?;
        }

        let raw = match self.winning_configuration(rule_code, as_of, context)? {
            Some(config) => config.value,
            None => fallback_value(&rule, as_of).ok_or_else(|| {
                EngineError::RuleValue(format!(
                    "rule '{}' has no configuration, value, or default in effect",
                    rule_code
                ))
            })?,
        };

        let value = cast_value(&raw, rule.value_type)?;
        rule.constraints.check(&value)?;
        if follow_parent {
            self.cache.put(key, value.clone());
        }
        Ok(value)
    }

    /// A boolean parent rule resolving to false switches its children off.
    /// Single level only: the parent is resolved without chasing its own
    /// parent pointer.
    fn check_parent_gate(
        &self,
        rule: &AcademicRule,
        as_of: DateTime<Utc>,
        context: &ResolutionContext,
    ) -> Result<(), EngineError> {
        let Some(parent_code) = rule.parent_rule_id.as_deref() else {
            return Ok(());
        };
        match self.resolve_inner(parent_code, as_of, context, false) {
            Ok(RuleValue::Bool(false)) => Err(EngineError::NotFound(format!(
                "rule '{}' is switched off by parent rule '{}'",
                rule.rule_code, parent_code
            ))),
            Ok(_) => Ok(()),
            Err(EngineError::NotFound(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn winning_configuration(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
        context: &ResolutionContext,
    ) -> Result<Option<RuleConfiguration>, EngineError> {
        let candidates = self.repository.active_configurations(rule_code, as_of)?;
        let mut winner: Option<RuleConfiguration> = None;
        for candidate in candidates {
            if !candidate.effective_at(as_of) {
                continue;
            }
            if !scope_matches(&candidate, context) {
                continue;
            }
            // An unapproved override is not yet in effect.
            if candidate.is_override && candidate.override_approved_by.is_none() {
                continue;
            }
            winner = match winner {
                None => Some(candidate),
                Some(current) => {
                    let candidate_rank = (candidate.specificity(), candidate.updated_at);
                    let current_rank = (current.specificity(), current.updated_at);
                    if candidate_rank > current_rank {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        Ok(winner)
    }
}

fn scope_matches(config: &RuleConfiguration, context: &ResolutionContext) -> bool {
    let field_matches = |config_field: &Option<String>, requested: &Option<String>| match config_field
    {
        None => true,
        Some(value) => requested.as_deref() == Some(value.as_str()),
    };
    field_matches(&config.academic_session_id, &context.session_id)
        && field_matches(&config.program_id, &context.program_id)
        && field_matches(&config.department_id, &context.department_id)
}

/// The rule's own value applies inside its effective window; the default
/// value applies unconditionally.
fn fallback_value(rule: &AcademicRule, as_of: DateTime<Utc>) -> Option<String> {
    let in_window = rule.effective_from.map_or(true, |from| as_of >= from)
        && rule.effective_to.map_or(true, |to| as_of <= to);
    if in_window {
        if let Some(value) = &rule.value {
            return Some(value.clone());
        }
    }
    rule.default_value.clone()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::Duration;

    use acadra_core::rule_value::{RuleConstraints, ValueType};

    use super::super::models::{
        AcademicRule, NewAcademicRule, NewRuleConfiguration, RuleCategory, RuleFilter,
    };
    use super::*;

    struct FakeRuleRepository {
        rules: Vec<AcademicRule>,
        configurations: StdMutex<Vec<RuleConfiguration>>,
    }

    impl FakeRuleRepository {
        fn new(rules: Vec<AcademicRule>, configurations: Vec<RuleConfiguration>) -> Self {
            Self {
                rules,
                configurations: StdMutex::new(configurations),
            }
        }
    }

    impl RuleRepository for FakeRuleRepository {
        fn get_rule(&self, rule_code: &str) -> Result<Option<AcademicRule>, EngineError> {
            Ok(self.rules.iter().find(|r| r.rule_code == rule_code).cloned())
        }

        fn list_rules(&self, _filter: &RuleFilter) -> Result<Vec<AcademicRule>, EngineError> {
            Ok(self.rules.clone())
        }

        fn create_rule(&self, _rule: &NewAcademicRule) -> Result<AcademicRule, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn soft_delete_rule(&self, _rule_code: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn active_configurations(
            &self,
            rule_code: &str,
            _as_of: DateTime<Utc>,
        ) -> Result<Vec<RuleConfiguration>, EngineError> {
            Ok(self
                .configurations
                .lock()
                .expect("configurations lock")
                .iter()
                .filter(|c| c.rule_code == rule_code && c.is_active && c.deleted_at.is_none())
                .cloned()
                .collect())
        }

        fn configurations_with_deleted(
            &self,
            rule_code: &str,
        ) -> Result<Vec<RuleConfiguration>, EngineError> {
            Ok(self
                .configurations
                .lock()
                .expect("configurations lock")
                .iter()
                .filter(|c| c.rule_code == rule_code)
                .cloned()
                .collect())
        }

        fn insert_configuration(
            &self,
            _config: &NewRuleConfiguration,
        ) -> Result<RuleConfiguration, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn approve_override(
            &self,
            _rule_code: &str,
            _configuration_id: &str,
            _approver: &str,
        ) -> Result<RuleConfiguration, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn soft_delete_configuration(&self, _configuration_id: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn rule(code: &str, value_type: ValueType, value: Option<&str>, default: Option<&str>) -> AcademicRule {
        let now = Utc::now();
        AcademicRule {
            rule_code: code.into(),
            name: code.into(),
            category: RuleCategory::General,
            value_type,
            value: value.map(str::to_string),
            default_value: default.map(str::to_string),
            constraints: RuleConstraints::default(),
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: false,
            priority: 100,
            parent_rule_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn config(
        code: &str,
        value: &str,
        session: Option<&str>,
        program: Option<&str>,
        department: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> RuleConfiguration {
        RuleConfiguration {
            configuration_id: format!("cfg-{}-{}", code, value),
            rule_code: code.into(),
            academic_session_id: session.map(str::to_string),
            program_id: program.map(str::to_string),
            department_id: department.map(str::to_string),
            value: value.into(),
            is_override: false,
            override_reason: None,
            override_approved_by: None,
            effective_from: None,
            effective_to: None,
            is_active: true,
            created_at: updated_at,
            updated_at,
            deleted_at: None,
        }
    }

    fn resolver(repo: FakeRuleRepository) -> RuleResolver<FakeRuleRepository> {
        RuleResolver::new(Arc::new(repo), ResolverCache::new())
    }

    #[test]
    fn specificity_ordering_most_specific_wins() {
        let now = Utc::now();
        let repo = FakeRuleRepository::new(
            vec![rule("ATTENDANCE_MIN_PERCENT", ValueType::Decimal, Some("60"), None)],
            vec![
                config("ATTENDANCE_MIN_PERCENT", "65", Some("s1"), None, None, now),
                config("ATTENDANCE_MIN_PERCENT", "70", Some("s1"), Some("p1"), Some("d1"), now),
            ],
        );
        let resolver = resolver(repo);

        let full = ResolutionContext::new()
            .with_session("s1")
            .with_program("p1")
            .with_department("d1");
        let value = resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &full).unwrap();
        assert_eq!(value, RuleValue::Decimal(70.0));

        let session_only = ResolutionContext::new().with_session("s1");
        let value = resolver
            .resolve("ATTENDANCE_MIN_PERCENT", now, &session_only)
            .unwrap();
        assert_eq!(value, RuleValue::Decimal(65.0));

        let global = ResolutionContext::new();
        let value = resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &global).unwrap();
        assert_eq!(value, RuleValue::Decimal(60.0));
    }

    #[test]
    fn expired_configuration_never_wins_regardless_of_specificity() {
        let now = Utc::now();
        let mut expired = config(
            "ATKT_MAX_SUBJECTS",
            "9",
            Some("s1"),
            Some("p1"),
            Some("d1"),
            now,
        );
        expired.effective_to = Some(now - Duration::days(1));
        let repo = FakeRuleRepository::new(
            vec![rule("ATKT_MAX_SUBJECTS", ValueType::Integer, Some("4"), None)],
            vec![expired],
        );
        let resolver = resolver(repo);

        let full = ResolutionContext::new()
            .with_session("s1")
            .with_program("p1")
            .with_department("d1");
        let value = resolver.resolve("ATKT_MAX_SUBJECTS", now, &full).unwrap();
        assert_eq!(value, RuleValue::Int(4));
    }

    #[test]
    fn unapproved_override_is_inert() {
        let now = Utc::now();
        let mut override_config = config("FEE_CLEARANCE_REQUIRED", "false", Some("s1"), None, None, now);
        override_config.is_override = true;
        override_config.override_reason = Some("fee waiver batch".into());
        let repo = FakeRuleRepository::new(
            vec![rule("FEE_CLEARANCE_REQUIRED", ValueType::Boolean, Some("true"), None)],
            vec![override_config.clone()],
        );
        let resolver_a = resolver(repo);

        let ctx = ResolutionContext::new().with_session("s1");
        let value = resolver_a.resolve("FEE_CLEARANCE_REQUIRED", now, &ctx).unwrap();
        assert_eq!(value, RuleValue::Bool(true));

        let mut approved = override_config;
        approved.override_approved_by = Some("registrar-1".into());
        let repo = FakeRuleRepository::new(
            vec![rule("FEE_CLEARANCE_REQUIRED", ValueType::Boolean, Some("true"), None)],
            vec![approved],
        );
        let resolver = resolver(repo);
        let value = resolver.resolve("FEE_CLEARANCE_REQUIRED", now, &ctx).unwrap();
        assert_eq!(value, RuleValue::Bool(false));
    }

    #[test]
    fn equal_specificity_tie_breaks_on_most_recent_update() {
        let now = Utc::now();
        let repo = FakeRuleRepository::new(
            vec![rule("ATTENDANCE_MIN_PERCENT", ValueType::Decimal, None, Some("75"))],
            vec![
                config("ATTENDANCE_MIN_PERCENT", "72", Some("s1"), None, None, now - Duration::hours(2)),
                config("ATTENDANCE_MIN_PERCENT", "68", Some("s1"), None, None, now - Duration::hours(1)),
            ],
        );
        let resolver = resolver(repo);

        let ctx = ResolutionContext::new().with_session("s1");
        let value = resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &ctx).unwrap();
        assert_eq!(value, RuleValue::Decimal(68.0));
    }

    #[test]
    fn scoped_configuration_does_not_leak_into_unscoped_context() {
        let now = Utc::now();
        let repo = FakeRuleRepository::new(
            vec![rule("ATKT_MAX_SUBJECTS", ValueType::Integer, Some("4"), None)],
            vec![config("ATKT_MAX_SUBJECTS", "2", Some("s1"), None, None, now)],
        );
        let resolver = resolver(repo);

        // No session in context: the session-scoped row must not match.
        let value = resolver
            .resolve("ATKT_MAX_SUBJECTS", now, &ResolutionContext::new())
            .unwrap();
        assert_eq!(value, RuleValue::Int(4));
    }

    #[test]
    fn unknown_rule_is_not_found_and_default_helper_covers_it() {
        let now = Utc::now();
        let resolver = resolver(FakeRuleRepository::new(vec![], vec![]));
        let err = resolver
            .resolve("NO_SUCH_RULE", now, &ResolutionContext::new())
            .expect_err("unknown rule must fail");
        assert!(matches!(err, EngineError::NotFound(_)));

        let value = resolver
            .resolve_with_default("NO_SUCH_RULE", now, &ResolutionContext::new(), RuleValue::Int(4))
            .unwrap();
        assert_eq!(value, RuleValue::Int(4));
    }

    #[test]
    fn parent_gate_switches_child_off() {
        let now = Utc::now();
        let mut child = rule("ATKT_MAX_SUBJECTS", ValueType::Integer, Some("4"), None);
        child.parent_rule_id = Some("ATKT_ENABLED".into());
        let repo = FakeRuleRepository::new(
            vec![child, rule("ATKT_ENABLED", ValueType::Boolean, Some("false"), None)],
            vec![],
        );
        let resolver = resolver(repo);

        let err = resolver
            .resolve("ATKT_MAX_SUBJECTS", now, &ResolutionContext::new())
            .expect_err("gated rule must not resolve");
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn cache_hit_and_invalidation() {
        let now = Utc::now();
        let repo = FakeRuleRepository::new(
            vec![rule("ATTENDANCE_MIN_PERCENT", ValueType::Decimal, Some("75"), None)],
            vec![],
        );
        let resolver = resolver(repo);
        let ctx = ResolutionContext::new().with_session("s1");

        resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &ctx).unwrap();
        assert_eq!(resolver.cache().len(), 1);

        resolver.cache().invalidate_rule("ATTENDANCE_MIN_PERCENT");
        assert_eq!(resolver.cache().len(), 0);
    }

    #[test]
    fn constraint_violation_surfaces_as_rule_value_error() {
        let now = Utc::now();
        let mut bounded = rule("ATTENDANCE_MIN_PERCENT", ValueType::Decimal, Some("140"), None);
        bounded.constraints = RuleConstraints {
            min_value: Some(0.0),
            max_value: Some(100.0),
            ..Default::default()
        };
        let resolver = resolver(FakeRuleRepository::new(vec![bounded], vec![]));

        let err = resolver
            .resolve("ATTENDANCE_MIN_PERCENT", now, &ResolutionContext::new())
            .expect_err("out-of-bounds value must fail");
        assert!(matches!(err, EngineError::RuleValue(_)));
    }
}
