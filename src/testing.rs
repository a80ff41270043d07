//! Test doubles shared by unit tests across the crate.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use storyloop_common::Story;

use crate::agents::{
    AgentInvoker, AgentRegistry, AgentRequest, AgentResponse, AgentSpec, DEFAULT_AGENT,
};
use crate::errors::StoreError;
use crate::story::StoryStore;
use crate::vcs::VersionControl;

/// An agent that replays canned responses and records every prompt.
///
/// Once the script is exhausted it answers with the fallback, or repeats its
/// last scripted response.
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<AgentResponse>>,
    last: Mutex<Option<AgentResponse>>,
    fallback: Option<AgentResponse>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(name: &str, responses: Vec<AgentResponse>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_succeeding(name: &str) -> Self {
        Self::new(name, Vec::new()).with_fallback(AgentResponse::succeeded("ok"))
    }

    pub fn with_fallback(mut self, response: AgentResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|req| req.prompt.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let response = match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => match (&self.fallback, self.last.lock().unwrap().clone()) {
                (Some(fallback), _) => fallback.clone(),
                (None, Some(last)) => last,
                (None, None) => AgentResponse::succeeded("ok"),
            },
        };
        Ok(response)
    }
}

/// Registry whose default factory hands out the given agents by id.
pub fn registry_for(agents: Vec<Arc<ScriptedAgent>>) -> AgentRegistry {
    let by_id: HashMap<String, Arc<ScriptedAgent>> = agents
        .into_iter()
        .map(|a| (a.name.clone(), a))
        .collect();
    AgentRegistry::new().with(DEFAULT_AGENT, move |spec: &AgentSpec| {
        match by_id.get(&spec.id) {
            Some(agent) => Ok(agent.clone() as Arc<dyn AgentInvoker>),
            None => bail!("no scripted agent with id '{}'", spec.id),
        }
    })
}

#[derive(Default)]
struct VcsState {
    staged: Vec<String>,
    unstaged: Vec<String>,
    commits: Vec<String>,
}

/// In-memory version control that records what the executor asked for.
#[derive(Default)]
pub struct RecordingVcs {
    state: Mutex<VcsState>,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage files as if something other than the executor had added them.
    pub fn stage_externally(&self, files: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.staged.extend(files.iter().map(|f| f.to_string()));
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn unstaged(&self) -> Vec<String> {
        self.state.lock().unwrap().unstaged.clone()
    }
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn add(&self, files: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for file in files {
            if !state.staged.contains(file) {
                state.staged.push(file.clone());
            }
        }
        Ok(())
    }

    async fn staged_files(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().staged.clone())
    }

    async fn unstage(&self, files: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.staged.retain(|f| !files.contains(f));
        state.unstaged.extend(files.iter().cloned());
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.staged.is_empty() {
            bail!("nothing to commit");
        }
        state.staged.clear();
        state.commits.push(message.to_string());
        Ok(format!("{:07x}", state.commits.len()))
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().staged.clone())
    }
}

/// Story store backed by a map; saves can be made to fail.
#[derive(Default)]
pub struct MemoryStoryStore {
    stories: Mutex<BTreeMap<String, Story>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStoryStore {
    pub fn with_stories(stories: Vec<Story>) -> Self {
        let store = Self::default();
        {
            let mut map = store.stories.lock().unwrap();
            for story in stories {
                map.insert(story.id.clone(), story);
            }
        }
        store
    }

    pub fn fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn get(&self, id: &str) -> Option<Story> {
        self.stories.lock().unwrap().get(id).cloned()
    }
}

impl StoryStore for MemoryStoryStore {
    fn load(&self, id: &str) -> Result<Story, StoreError> {
        self.get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    fn save(&self, story: &Story) -> Result<(), StoreError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(StoreError::Io {
                path: format!("{}.md", story.id).into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.stories
            .lock()
            .unwrap()
            .insert(story.id.clone(), story.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Story>, StoreError> {
        Ok(self.stories.lock().unwrap().values().cloned().collect())
    }
}
