//! Question content: the [`QuestionSource`] seam and two built-in
//! sources.
//!
//! The session core never cares where questions come from. It asks a
//! source for the next question, passing the ids already used in this
//! game, and either gets one back or a [`ContentError`].

use std::sync::{Mutex, PoisonError};

use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};

use quizroom_protocol::QuestionView;

/// Identifies a question within a source. Used to avoid repeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub String);

impl From<&str> for QuestionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A multiple-choice question, including its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl Question {
    /// What clients see: everything but the answer.
    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id.0.clone(),
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            media_url: self.media_url.clone(),
        }
    }

    pub fn is_correct(&self, choice: usize) -> bool {
        choice == self.correct_index
    }

    /// The text of the correct option.
    pub fn correct_option(&self) -> &str {
        self.options
            .get(self.correct_index)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Errors from a question source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// Every question has been used.
    #[error("question source exhausted")]
    Exhausted,

    /// The source could not be reached or returned garbage.
    #[error("question source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies questions to a room.
///
/// Implementations must be `Send + Sync + 'static`: one source is shared
/// by every room actor.
///
/// A source may do I/O. The calling room waits for it; other rooms
/// don't.
pub trait QuestionSource: Send + Sync + 'static {
    /// Returns a question whose id is not in `used`.
    fn next_question(
        &self,
        used: &[QuestionId],
    ) -> impl std::future::Future<Output = Result<Question, ContentError>> + Send;
}

// ---------------------------------------------------------------------------
// QuestionList
// ---------------------------------------------------------------------------

/// A fixed list of questions served in order, skipping any already used.
#[derive(Debug, Clone, Default)]
pub struct QuestionList {
    questions: Vec<Question>,
}

impl QuestionList {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl QuestionSource for QuestionList {
    async fn next_question(
        &self,
        used: &[QuestionId],
    ) -> Result<Question, ContentError> {
        self.questions
            .iter()
            .find(|q| !used.contains(&q.id))
            .cloned()
            .ok_or(ContentError::Exhausted)
    }
}

// ---------------------------------------------------------------------------
// TrackCatalog
// ---------------------------------------------------------------------------

/// One entry in a [`TrackCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
}

impl Track {
    pub fn new(id: &str, title: &str, artist: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            genre: None,
            preview_url: None,
        }
    }

    pub fn with_genre(mut self, genre: &str) -> Self {
        self.genre = Some(genre.to_string());
        self
    }
}

/// Name-that-track questions drawn from a catalog.
///
/// Each question picks a random unused track, then up to three other
/// titles as distractors (same genre first), and shuffles the options.
#[derive(Debug)]
pub struct TrackCatalog {
    tracks: Vec<Track>,
    distractors: usize,
    /// Tracks added after construction via [`TrackCatalog::extend`].
    extra: Mutex<Vec<Track>>,
}

impl TrackCatalog {
    /// Maximum number of wrong options per question.
    pub const MAX_DISTRACTORS: usize = 3;

    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            distractors: Self::MAX_DISTRACTORS,
            extra: Mutex::new(Vec::new()),
        }
    }

    /// A small built-in catalog for local play.
    pub fn demo() -> Self {
        Self::new(vec![
            Track::new("1", "Bohemian Rhapsody", "Queen").with_genre("rock"),
            Track::new("2", "Billie Jean", "Michael Jackson").with_genre("pop"),
            Track::new("3", "Sweet Child O' Mine", "Guns N' Roses")
                .with_genre("rock"),
            Track::new("4", "Smells Like Teen Spirit", "Nirvana")
                .with_genre("rock"),
            Track::new("5", "Like a Prayer", "Madonna").with_genre("pop"),
            Track::new("6", "Hotel California", "Eagles").with_genre("rock"),
            Track::new("7", "Superstition", "Stevie Wonder").with_genre("soul"),
            Track::new("8", "Wonderwall", "Oasis").with_genre("rock"),
            Track::new("9", "Respect", "Aretha Franklin").with_genre("soul"),
            Track::new("10", "Take On Me", "a-ha").with_genre("pop"),
            Track::new("11", "Africa", "Toto").with_genre("rock"),
            Track::new("12", "Dancing Queen", "ABBA").with_genre("pop"),
        ])
    }

    /// Limits the number of distractors per question (at most
    /// [`Self::MAX_DISTRACTORS`]).
    pub fn with_distractors(mut self, count: usize) -> Self {
        self.distractors = count.min(Self::MAX_DISTRACTORS);
        self
    }

    /// Adds tracks to a live catalog.
    pub fn extend(&self, tracks: impl IntoIterator<Item = Track>) {
        self.extra
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tracks);
    }

    fn snapshot(&self) -> Vec<Track> {
        let mut all = self.tracks.clone();
        let extra = self.extra.lock().unwrap_or_else(PoisonError::into_inner);
        all.extend(extra.iter().cloned());
        all
    }

    fn build_question(
        &self,
        tracks: &[Track],
        used: &[QuestionId],
    ) -> Result<Question, ContentError> {
        let mut rng = rand::rng();

        let unused: Vec<&Track> = tracks
            .iter()
            .filter(|t| !used.iter().any(|u| u.0 == t.id))
            .collect();
        let answer = *unused.choose(&mut rng).ok_or(ContentError::Exhausted)?;

        // Same-genre titles first, then the rest, never repeating a title.
        let mut same: Vec<&Track> = Vec::new();
        let mut other: Vec<&Track> = Vec::new();
        for track in tracks.iter().filter(|t| t.id != answer.id) {
            if track.title.eq_ignore_ascii_case(&answer.title) {
                continue;
            }
            if track.genre.is_some() && track.genre == answer.genre {
                same.push(track);
            } else {
                other.push(track);
            }
        }
        same.shuffle(&mut rng);
        other.shuffle(&mut rng);

        let mut options = vec![answer.title.clone()];
        for track in same.into_iter().chain(other) {
            if options.len() > self.distractors {
                break;
            }
            if !options.iter().any(|o| o.eq_ignore_ascii_case(&track.title)) {
                options.push(track.title.clone());
            }
        }
        options.shuffle(&mut rng);

        let correct_index = options
            .iter()
            .position(|o| *o == answer.title)
            .ok_or_else(|| {
                ContentError::Unavailable("answer lost while shuffling".into())
            })?;

        Ok(Question {
            id: QuestionId(answer.id.clone()),
            prompt: format!("Name this track by {}", answer.artist),
            options,
            correct_index,
            media_url: answer.preview_url.clone(),
        })
    }
}

impl QuestionSource for TrackCatalog {
    async fn next_question(
        &self,
        used: &[QuestionId],
    ) -> Result<Question, ContentError> {
        let tracks = self.snapshot();
        let question = self.build_question(&tracks, used)?;
        tracing::trace!(
            question_id = %question.id.0,
            options = question.options.len(),
            "track question built"
        );
        Ok(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            id: id.into(),
            prompt: format!("Question {id}?"),
            options: vec!["a".into(), "b".into()],
            correct_index: 1,
            media_url: None,
        }
    }

    #[tokio::test]
    async fn test_question_list_serves_in_order() {
        let list = QuestionList::new(vec![question("q1"), question("q2")]);
        let first = list.next_question(&[]).await.unwrap();
        assert_eq!(first.id, QuestionId::from("q1"));

        let second = list.next_question(&["q1".into()]).await.unwrap();
        assert_eq!(second.id, QuestionId::from("q2"));
    }

    #[tokio::test]
    async fn test_question_list_exhausted() {
        let list = QuestionList::new(vec![question("q1")]);
        let err = list.next_question(&["q1".into()]).await.unwrap_err();
        assert_eq!(err, ContentError::Exhausted);
    }

    #[test]
    fn test_question_view_hides_answer() {
        let q = question("q1");
        let view = q.view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("correct"));
        assert_eq!(view.options, q.options);
        assert_eq!(q.correct_option(), "b");
        assert!(q.is_correct(1));
        assert!(!q.is_correct(0));
    }

    #[tokio::test]
    async fn test_track_catalog_builds_four_options() {
        let catalog = TrackCatalog::demo();
        let q = catalog.next_question(&[]).await.unwrap();

        assert_eq!(q.options.len(), 4);
        let mut unique = q.options.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4, "options must be distinct");
        assert!(q.correct_index < q.options.len());
    }

    #[tokio::test]
    async fn test_track_catalog_skips_used_tracks() {
        let catalog = TrackCatalog::new(vec![
            Track::new("a", "Alpha", "X"),
            Track::new("b", "Beta", "Y"),
        ]);
        let q = catalog.next_question(&["a".into()]).await.unwrap();
        assert_eq!(q.id, QuestionId::from("b"));
        assert_eq!(q.correct_option(), "Beta");
        assert_eq!(q.options.len(), 2);
    }

    #[tokio::test]
    async fn test_track_catalog_exhausted() {
        let catalog = TrackCatalog::new(vec![Track::new("a", "Alpha", "X")]);
        let err = catalog.next_question(&["a".into()]).await.unwrap_err();
        assert_eq!(err, ContentError::Exhausted);
    }

    #[tokio::test]
    async fn test_track_catalog_prefers_same_genre_distractors() {
        let catalog = TrackCatalog::new(vec![
            Track::new("r1", "Rock One", "A").with_genre("rock"),
            Track::new("r2", "Rock Two", "B").with_genre("rock"),
            Track::new("p1", "Pop One", "C").with_genre("pop"),
            Track::new("p2", "Pop Two", "D").with_genre("pop"),
        ])
        .with_distractors(1);

        let used: Vec<QuestionId> =
            vec!["r2".into(), "p1".into(), "p2".into()];
        let q = catalog.next_question(&used).await.unwrap();

        assert_eq!(q.correct_option(), "Rock One");
        assert_eq!(q.options.len(), 2);
        assert!(q.options.contains(&"Rock Two".to_string()));
    }

    #[tokio::test]
    async fn test_track_catalog_extend() {
        let catalog = TrackCatalog::new(vec![]);
        catalog.extend([Track::new("z", "Zeta", "Z")]);
        let q = catalog.next_question(&[]).await.unwrap();
        assert_eq!(q.id, QuestionId::from("z"));
    }

    #[tokio::test]
    async fn test_track_catalog_extend_after_panicked_holder() {
        let catalog = std::sync::Arc::new(TrackCatalog::new(vec![
            Track::new("a", "Alpha", "X"),
        ]));
        let holder = catalog.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.extra.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(catalog.extra.is_poisoned());

        catalog.extend([Track::new("b", "Beta", "Y")]);
        let q = catalog.next_question(&["a".into()]).await.unwrap();
        assert_eq!(q.id, QuestionId::from("b"));
    }
}
