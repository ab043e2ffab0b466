//! 委派路由 - 根据任务描述选择专职 Agent
//!
//! 判定顺序：
//! - 调用方建议的 Agent (已知 Agent ID 或路由关键词)
//! - 描述中的 `@mention`
//! - 路由表关键词词频打分，同分取表中靠前者
//! - 以上都没有时交给编排 Agent

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use openclaw_core::DelegationConfig;
use openclaw_memory::AgentId;

static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z][A-Za-z0-9_-]*)").unwrap());

const DEFAULT_ROUTES: &[(&str, &[&str])] = &[
    (
        "researcher",
        &["research", "investigate", "look up", "find out", "search", "研究", "调研"],
    ),
    (
        "developer",
        &["code", "bug", "implement", "refactor", "debug", "compile", "代码", "开发"],
    ),
    (
        "writer",
        &["write", "draft", "blog", "article", "summarize", "撰写", "文案"],
    ),
    (
        "analyst",
        &["analyze", "analysis", "data", "report", "metrics", "分析", "报表"],
    ),
    (
        "ops",
        &["deploy", "server", "monitor", "backup", "infrastructure", "部署", "运维"],
    ),
];

/// 路由表条目
#[derive(Debug, Clone)]
pub struct Route {
    pub keyword: String,
    pub agent: AgentId,
    pattern: Regex,
}

impl Route {
    fn new(keyword: String, agent: AgentId) -> Self {
        // 英文关键词按整词匹配, "research" 不计入 "search"; 中文没有词边界, 按子串匹配
        let escaped = regex::escape(&keyword);
        let pattern = if keyword.is_ascii() {
            format!(r"\b{}\b", escaped)
        } else {
            escaped
        };
        Self {
            keyword,
            agent,
            pattern: Regex::new(&pattern).unwrap(),
        }
    }

    fn hits(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }
}

#[derive(Debug, Clone)]
pub struct DelegationRouter {
    orchestrator: AgentId,
    agents: Vec<AgentId>,
    routes: Vec<Route>,
}

impl DelegationRouter {
    /// 空路由表，只认识编排 Agent
    pub fn new(orchestrator: impl Into<AgentId>) -> Self {
        let orchestrator = orchestrator.into();
        Self {
            agents: vec![orchestrator.clone()],
            orchestrator,
            routes: Vec::new(),
        }
    }

    /// 内置路由表
    pub fn with_default_routes(orchestrator: impl Into<AgentId>) -> Self {
        DEFAULT_ROUTES
            .iter()
            .flat_map(|(agent, keywords)| keywords.iter().map(move |k| (*k, *agent)))
            .fold(Self::new(orchestrator), |router, (keyword, agent)| {
                router.with_route(keyword, agent)
            })
    }

    pub fn from_config(config: &DelegationConfig) -> Self {
        Self::with_default_routes(config.orchestrator_agent.clone())
    }

    /// 追加一条关键词路由，目标 Agent 自动登记为已知
    pub fn with_route(mut self, keyword: impl Into<String>, agent: impl Into<AgentId>) -> Self {
        let agent = agent.into();
        if !self.agents.contains(&agent) {
            self.agents.push(agent.clone());
        }
        self.routes.push(Route::new(keyword.into().to_lowercase(), agent));
        self
    }

    pub fn orchestrator(&self) -> &str {
        &self.orchestrator
    }

    pub fn known_agents(&self) -> &[AgentId] {
        &self.agents
    }

    /// 把名字解析为 Agent: 已知 Agent ID 或路由关键词
    fn resolve(&self, name: &str) -> Option<AgentId> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        if let Some(agent) = self.agents.iter().find(|a| a.to_lowercase() == name) {
            return Some(agent.clone());
        }
        self.routes
            .iter()
            .find(|r| r.keyword == name)
            .map(|r| r.agent.clone())
    }

    pub fn determine_target_agent(&self, description: &str, suggested: Option<&str>) -> AgentId {
        if let Some(agent) = suggested.and_then(|s| self.resolve(s)) {
            debug!(agent = %agent, "使用建议的 Agent");
            return agent;
        }

        if let Some(agent) = MENTION
            .captures_iter(description)
            .find_map(|caps| self.resolve(&caps[1]))
        {
            debug!(agent = %agent, "使用 @mention 指定的 Agent");
            return agent;
        }

        if let Some((agent, score)) = self.score(description) {
            debug!(agent = %agent, score, "关键词路由");
            return agent;
        }

        self.orchestrator.clone()
    }

    /// 关键词词频打分, 没有命中时返回 `None`
    fn score(&self, description: &str) -> Option<(AgentId, usize)> {
        let text = description.to_lowercase();
        let mut scores: Vec<(&AgentId, usize)> = Vec::new();

        for route in &self.routes {
            let hits = route.hits(&text);
            match scores.iter_mut().find(|(agent, _)| **agent == route.agent) {
                Some((_, score)) => *score += hits,
                None => scores.push((&route.agent, hits)),
            }
        }

        let mut best: Option<(&AgentId, usize)> = None;
        for (agent, score) in scores {
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((agent, score));
            }
        }
        best.map(|(agent, score)| (agent.clone(), score))
    }
}

impl Default for DelegationRouter {
    fn default() -> Self {
        Self::with_default_routes("main")
    }
}
