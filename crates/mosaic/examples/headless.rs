use std::{fs::File, io::BufWriter, thread, time::Duration};

use log::{info, warn};
use mosaic::prelude::*;

const PARENT: u64 = 0x100;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (mosaic, host) = Mosaic::headless(Config {
        dock_gap: 4,
        ..Config::default()
    });

    let software = match mosaic.register_software(SoftwareConfig {
        clear_color: [24, 24, 32, 255],
        frame_limit: None,
    }) {
        Ok(backend) => backend,
        Err(err) => {
            warn!("cannot register software backend: {err}");
            return;
        }
    };

    let atlases = mosaic.atlases().clone();
    let Ok(ui) = atlases.create_atlas(AtlasConfig::new("ui", 256, 256)) else {
        warn!("cannot create atlas");
        return;
    };

    let colors = [
        ("red", [220, 60, 60, 255]),
        ("green", [60, 200, 90, 255]),
        ("blue", [70, 110, 230, 255]),
        ("gold", [230, 190, 60, 255]),
    ];

    let sprites: Vec<SpriteHandle> = colors
        .iter()
        .filter_map(|(name, rgba)| {
            atlases
                .add_sprite(ui, name, &PixelBuffer::filled(Extent::new(16, 16), *rgba))
                .map_err(|err| warn!("sprite {name}: {err}"))
                .ok()
        })
        .collect();

    let Some(parent) = NativeHandle::new(PARENT) else {
        return;
    };
    host.set_client_area(parent, 640, 480);

    let orchestrator = mosaic.orchestrator();
    let windows: Vec<NativeHandle> = (1..=4).filter_map(NativeHandle::new).collect();

    for &window in &windows {
        let desc = WindowDesc::new(window, BackendType::Software)
            .with_parent(parent)
            .with_resize(move |width, height| info!("{window:?} resized to {width}x{height}"));

        if let Err(err) = orchestrator.add_window(desc) {
            warn!("{err}");
        }
    }

    for (&window, &sprite) in windows.iter().zip(sprites.iter().cycle()) {
        let atlases = atlases.clone();
        orchestrator.enqueue(window, move || {
            let Some(context) = current() else {
                return;
            };

            let size = context.virtual_size();
            let dst = Rect::new(
                Point::new(size.width as f32 / 4.0, size.height as f32 / 4.0),
                Extent::new(size.width as f32 / 2.0, size.height as f32 / 2.0),
            );

            if context.draw_sprite(&atlases, sprite, dst) {
                info!("{:?}: drew sprite into {}x{}", context.owner(), size.width, size.height);
            }
        });
    }

    // Grow the parent and lay its children out again.
    host.set_client_area(parent, 800, 600);
    orchestrator.relayout(parent);

    if let Some(&first) = windows.first() {
        info!("drag: {:?}", orchestrator.drag_window(first, Point::new(700, 500)));
    }

    thread::sleep(Duration::from_millis(200));

    let removed = orchestrator.housekeep();
    info!(
        "{} window(s) running, {} removed, {} texture upload(s)",
        orchestrator.window_count(),
        removed.len(),
        software.upload_count()
    );

    mosaic.shutdown();

    let path = std::env::temp_dir().join("mosaic-ui-atlas.png");
    match File::create(&path) {
        Ok(file) => match atlases.atlas(ui) {
            Some(atlas) => match atlas.read().encode_png(BufWriter::new(file)) {
                Ok(()) => info!("wrote {}", path.display()),
                Err(err) => warn!("cannot encode atlas: {err}"),
            },
            None => warn!("atlas {ui:?} is gone"),
        },
        Err(err) => warn!("cannot create {}: {err}", path.display()),
    }
}
