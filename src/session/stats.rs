#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    frames_sent: u64,
    frames_held: u64,
    chunks_scheduled: u64,
    chunks_dropped: u64,
    reconnect_attempts: u64,
    total_tokens: u64,
    prompt_tokens: u64,
    response_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub(crate) fn frame_held(&mut self) {
        self.frames_held += 1;
    }

    pub(crate) fn chunk_scheduled(&mut self) {
        self.chunks_scheduled += 1;
    }

    pub(crate) fn chunk_dropped(&mut self) {
        self.chunks_dropped += 1;
    }

    pub(crate) fn reconnect_attempted(&mut self) {
        self.reconnect_attempts += 1;
    }

    pub(crate) fn update_usage(&mut self, total: u64, prompt: u64, response: u64) {
        self.total_tokens += total;
        self.prompt_tokens += prompt;
        self.response_tokens += response;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_held(&self) -> u64 {
        self.frames_held
    }

    pub fn chunks_scheduled(&self) -> u64 {
        self.chunks_scheduled
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }
}
