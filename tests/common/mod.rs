#![allow(dead_code)]

use ads_copilot::{CampaignDataset, ColumnMapping, CopilotError, GenerationRequest, Result, TextGenerator};
use async_trait::async_trait;
use polars::prelude::*;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply from the fake model
pub enum Step {
    Reply(String),
    Fail(String),
    Hang,
}

/// Text generator that replays a script and records every request it receives
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Step::Reply(r.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(reason)) => Err(CopilotError::ExternalService(reason)),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            None => Err(CopilotError::ExternalService("script exhausted".to_string())),
        }
    }
}

/// Impressions, Clicks, Cost, Campaign; clicks sum to 160
pub fn campaign_frame() -> DataFrame {
    df!(
        "Impressions" => [1000i64, 2000, 1500],
        "Clicks" => [50i64, 80, 30],
        "Cost" => [100.0, 150.0, 60.0],
        "Campaign" => ["Alpha", "Beta", "Alpha"]
    )
    .unwrap()
}

pub fn campaign_dataset() -> CampaignDataset {
    let frame = campaign_frame();
    let mapping = ColumnMapping::detect(&frame.get_column_names());
    CampaignDataset::new(frame, mapping).unwrap()
}
