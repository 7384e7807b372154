use {
    audio::AudioSample,
    base::log,
    inference::{
        Engine, FileCatalog, InferenceConfig, ModuleCatalog, Segment, SynthInput, packet_channel,
        synthetic::{LayerCosts, SyntheticVoice},
    },
    std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    },
};

const SENTENCES: [&str; 3] = [
    "Hello world, the cat is here.",
    "To be, or not to be.",
    "Supercalifragilistic words need the phonemizer.",
];
const FRAME_RATE: u64 = 60;
const MAX_FRAMES: usize = 60 * 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    base::init_stdout_logger();

    // synth_loop [<catalog dir> <actor>]
    let args: Vec<String> = std::env::args().collect();
    let (catalog, actor): (Arc<dyn ModuleCatalog>, String) = match (args.get(1), args.get(2)) {
        (Some(dir), Some(actor)) => (Arc::new(FileCatalog::new(dir)?), actor.clone()),
        _ => {
            let mut voice = SyntheticVoice::new("narrator");
            voice.layers = 12;
            voice.chunks = 4;
            voice.costs = LayerCosts::sleep(Duration::from_micros(1500))
                .with_slow_layer(7, Duration::from_millis(12));
            (Arc::new(voice.catalog()), voice.actor.clone())
        }
    };

    let config = InferenceConfig {
        target_budget_time: 0.004,
        ..Default::default()
    };
    let mut engine = Engine::new(catalog, config)?;

    let (callback, mut listener) = packet_channel();
    let played = Arc::new(AtomicUsize::new(0));
    for sentence in SENTENCES {
        let played = Arc::clone(&played);
        let id = engine.submit_with_audio(
            SynthInput::new(&actor).segment(Segment::new(sentence)),
            Arc::clone(&callback),
            Arc::new(move |sample: AudioSample, _final: bool| {
                played.fetch_add(sample.len(), Ordering::Relaxed);
            }),
        )?;
        log::info!("Submitted {}: \"{}\"", id, sentence);
    }

    let mut interval = tokio::time::interval(Duration::from_micros(1_000_000 / FRAME_RATE));
    let started = Instant::now();
    let mut finished = 0;
    let mut worst_frame = Duration::ZERO;
    for frame in 0..MAX_FRAMES {
        interval.tick().await;
        let frame_start = Instant::now();
        if let Some(report) = engine.update() {
            finished += 1;
            log::info!(
                "Request {} done after frame {}: {:?}, {} packets, {} warnings",
                report.id,
                frame,
                report.result.is_ok(),
                report.packets,
                report.warnings.len()
            );
        }
        worst_frame = worst_frame.max(frame_start.elapsed());

        while let Some(packet) = listener.try_recv() {
            log::info!(
                "{:>8.1}ms  {} chunk {:?} {:?} final={} {} samples markers={:?}",
                started.elapsed().as_secs_f64() * 1000.0,
                packet.request_id,
                packet.chunk_index,
                packet.status,
                packet.is_final,
                packet.audio.len(),
                packet.markers
            );
        }
        if finished == SENTENCES.len() {
            break;
        }
    }

    log::info!(
        "{} requests finished, {} samples through the jitter buffer, worst frame {:.2}ms",
        finished,
        played.load(Ordering::Relaxed),
        worst_frame.as_secs_f64() * 1000.0
    );
    engine.teardown()?;
    Ok(())
}
