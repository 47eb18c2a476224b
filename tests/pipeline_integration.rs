//! End-to-end pipeline test: scripted confidence sequence through the
//! full detection chain with stub model clients and tempdir artifacts.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil::artifact_store::ArtifactStore;
use vigil::frame_source::Frame;
use vigil::incident_log::IncidentLog;
use vigil::model_client::{Classifier, FaceBox, FaceDetector};
use vigil::notifier::{
    DeliveryOutcome, Notification, NotificationChannel, NotificationDispatcher,
};
use vigil::pipeline::Pipeline;
use vigil::realtime_hub::RealtimeHub;
use vigil::Result;

struct ScriptedClassifier {
    scores: Vec<f32>,
    cursor: AtomicUsize,
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn score(&self, _frame: &Frame) -> Result<f32> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(*self.scores.get(i).unwrap_or(&0.0))
    }
}

struct OneFace;

#[async_trait]
impl FaceDetector for OneFace {
    async fn detect_faces(&self, _frame: &Frame) -> Result<Vec<FaceBox>> {
        Ok(vec![FaceBox {
            x: 8,
            y: 8,
            width: 16,
            height: 16,
            confidence: 0.93,
        }])
    }
}

struct RecordingChannel {
    sends: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, _notification: &Notification) -> DeliveryOutcome {
        self.sends.fetch_add(1, Ordering::SeqCst);
        DeliveryOutcome::Sent
    }
}

fn frame() -> Frame {
    Frame::from_rgb(64, 48, vec![120u8; 64 * 48 * 3]).unwrap()
}

#[tokio::test]
async fn violence_episode_produces_one_incident_with_artifacts_and_notification() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).await.unwrap());
    let incident_log = Arc::new(IncidentLog::new(100));
    let channel = Arc::new(RecordingChannel {
        sends: AtomicUsize::new(0),
    });
    let dispatcher =
        NotificationDispatcher::new(vec![channel.clone() as Arc<dyn NotificationChannel>]);
    dispatcher.start().await;
    let hub = Arc::new(RealtimeHub::new());
    let (_conn, mut rx) = hub.register().await;

    // 20 high-confidence frames, then calm. The smoothed mean stays above
    // the escalation band for the first few calm frames, so the episode
    // spans a little over 20 frames before it closes.
    let mut scores = vec![0.95f32; 20];
    scores.extend(std::iter::repeat(0.0).take(15));

    let classifier = Arc::new(ScriptedClassifier {
        scores: scores.clone(),
        cursor: AtomicUsize::new(0),
    });

    let pipeline = Arc::new(Pipeline::new(
        classifier,
        Arc::new(OneFace),
        artifacts,
        incident_log.clone(),
        dispatcher.clone(),
        hub.clone(),
    ));

    let cam = pipeline.camera("cam-1", "Main Hall").await;
    {
        let mut cam = cam.lock().await;
        for _ in 0..scores.len() {
            pipeline.process_frame(&mut cam, &frame()).await;
        }
    }

    // Exactly one finalized incident in the log
    assert_eq!(incident_log.count().await, 1);
    let incident = incident_log.get_latest(1).await.into_iter().next().unwrap();
    assert_eq!(incident.location, "Main Hall");
    assert!(incident.faces_detected);
    assert_eq!(incident.faces.len(), 1);

    // Artifacts on disk where the incident says they are
    let image_path = incident.image_path.as_deref().unwrap();
    assert_eq!(image_path, &format!("uploads/incident_{}.jpg", incident.id));
    assert!(dir.path().join(image_path).exists());
    let face_path = &incident.faces[0].path;
    assert_eq!(
        face_path,
        &format!("uploads/faces/incident_{}_face_1.jpg", incident.id)
    );
    assert!(dir.path().join(face_path).exists());

    // One notification delivered through the worker
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.sends.load(Ordering::SeqCst), 1);
    let history = dispatcher.history(10).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].sent);
    assert!(history[0]
        .subject
        .starts_with("VIOLENCE ALERT - Main Hall - "));

    // Hub saw the alert transition and the incident broadcast
    let mut saw_alert_state = false;
    let mut saw_incident = false;
    while let Ok(msg) = rx.try_recv() {
        if msg.contains("\"type\":\"detection_status\"") && msg.contains("\"state\":\"alert\"") {
            saw_alert_state = true;
        }
        if msg.contains("\"type\":\"incident_alert\"") {
            saw_incident = true;
            assert!(msg.contains(&format!(
                "/static/uploads/incident_{}.jpg",
                incident.id
            )));
        }
    }
    assert!(saw_alert_state);
    assert!(saw_incident);
}

#[tokio::test]
async fn calm_footage_never_opens_an_incident() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).await.unwrap());
    let incident_log = Arc::new(IncidentLog::new(100));
    let dispatcher = NotificationDispatcher::new(vec![]);
    let hub = Arc::new(RealtimeHub::new());

    let classifier = Arc::new(ScriptedClassifier {
        scores: vec![0.3; 100],
        cursor: AtomicUsize::new(0),
    });

    let pipeline = Arc::new(Pipeline::new(
        classifier,
        Arc::new(OneFace),
        artifacts,
        incident_log.clone(),
        dispatcher,
        hub,
    ));

    let cam = pipeline.camera("cam-1", "Main Hall").await;
    let mut cam = cam.lock().await;
    for _ in 0..100 {
        let out = pipeline.process_frame(&mut cam, &frame()).await;
        assert!(!out.incident_signal);
    }

    assert_eq!(incident_log.count().await, 0);
}
