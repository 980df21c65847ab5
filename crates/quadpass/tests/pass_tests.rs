//! End-to-end passes against the mock GL context.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use quadpass::{
    DrawError, FilterMode, Params, PassConfig, PassContext, PixelData, ReadbackError, ResolvedTarget, Target,
    TargetSpec,
};
use quadpass_test_utils::{GlCall, MockGlContext, ShaderStage};

fn setup(width: u32, height: u32) -> (Rc<MockGlContext>, PassContext) {
    quadpass_core::logging::try_init();
    let mock = Rc::new(MockGlContext::new(width, height));
    let config = PassConfig::default().with_readback_poll_interval(Duration::ZERO);
    let ctx = PassContext::new(mock.clone(), config).unwrap();
    (mock, ctx)
}

#[test]
fn solid_red_into_a_single_pixel() {
    let (mock, mut ctx) = setup(16, 16);
    mock.register_fragment("1.0, 0.0, 0.0, 1.0", |_| [1.0, 0.0, 0.0, 1.0]);

    let out = ctx
        .draw(
            &Params::new().set("FP", "1.0, 0.0, 0.0, 1.0"),
            TargetSpec::new("red").size(1, 1).format("rgba8"),
        )
        .unwrap();
    let pixels = out.texture().unwrap().read_sync(None).unwrap();
    assert_eq!(pixels, PixelData::U8(vec![255, 0, 0, 255]));
}

#[test]
fn story_accumulates_through_src() {
    let (mock, mut ctx) = setup(16, 16);
    mock.register_fragment("Src(I).r + 1.0", |f| {
        let v = f.texel("Src", f.coord)[0] + 1.0;
        [v, 0.0, 0.0, 1.0]
    });

    let spec = TargetSpec::new("acc").size(4, 4).format("r32f").story(2);
    let params = Params::new().set("FP", "Src(I).r + 1.0");
    let mut out = ResolvedTarget::Default;
    for _ in 0..3 {
        out = ctx.draw(&params, spec.clone()).unwrap();
    }
    let story = out.story().unwrap();
    let current = story.current().read_sync(None).unwrap();
    assert!(current.as_f32().unwrap().iter().all(|&v| v == 3.0));
    let previous = story.get(1).unwrap().read_sync(Some([0, 0, 1, 1])).unwrap();
    assert_eq!(previous.as_f32().unwrap(), &[2.0]);
    assert_eq!(ctx.program_count(), 1);
    // Src was inferred as a float sampler
    let source = mock.current_source(ShaderStage::Fragment).unwrap();
    assert!(source.contains("uniform sampler2D Src;"));
}

#[test]
fn single_pixel_story_counts_to_three() {
    let (mock, mut ctx) = setup(16, 16);
    mock.register_fragment("Src(I).r + 1.0", |f| {
        let v = f.texel("Src", f.coord)[0] + 1.0;
        [v, 0.0, 0.0, 1.0]
    });

    let spec = TargetSpec::new("counter").size(1, 1).format("r32f").story(2);
    let params = Params::new().set("FP", "Src(I).r + 1.0");
    for _ in 0..3 {
        ctx.draw(&params, spec.clone()).unwrap();
    }
    let story = ctx.target("counter").unwrap().story().unwrap().clone();
    assert_eq!(story.len(), 2);
    assert_eq!(story.current().size(), [1, 1]);
    let current = story.current().read_sync(None).unwrap();
    assert_eq!(current.as_f32().unwrap(), &[3.0]);
    let previous = story.get(1).unwrap().read_sync(None).unwrap();
    assert_eq!(previous.as_f32().unwrap(), &[2.0]);
}

#[test]
fn depth_companion_resizes_in_lockstep() {
    let (mock, mut ctx) = setup(16, 16);
    let params = Params::new().set("Clear", 0.0);
    let out = ctx
        .draw(&params, TargetSpec::new("scene").size(4, 4).format("rgba8+depth"))
        .unwrap()
        .texture()
        .unwrap();
    let depth = out.depth().unwrap().clone();
    assert_eq!(depth.tag(), "scene_depth");

    ctx.draw(&params, TargetSpec::new("scene").size(8, 6).format("rgba8+depth"))
        .unwrap();
    assert_eq!(out.size(), [8, 6]);
    assert_eq!(depth.size(), [8, 6]);
    assert_eq!(mock.texture_size(out.texture()), Some((8, 6, 1)));
    assert_eq!(mock.texture_size(depth.texture()), Some((8, 6, 1)));
    assert_eq!(mock.count_texture_creates(), 2);

    ctx.reset();
    assert!(depth.is_freed());
    assert_eq!(mock.live_textures(), 0);
}

#[test]
fn resize_keeps_existing_samplers_valid() {
    let (_mock, mut ctx) = setup(16, 16);
    let spec = TargetSpec::new("field").size(4, 4).filter(FilterMode::Linear);
    let first = ctx.draw(&Params::new(), spec.clone()).unwrap().texture().unwrap();
    let sampler = first.sampler();

    let resized = ctx.draw(&Params::new(), spec.size(32, 8)).unwrap().texture().unwrap();
    assert!(Rc::ptr_eq(&first, &resized));
    assert!(sampler.same_texture(&resized.sampler()));
    assert_eq!(sampler.filter(), FilterMode::Linear);
    assert_eq!(resized.size(), [32, 8]);
}

#[test]
fn drawing_buffer_sized_targets_follow_scale() {
    let (mock, mut ctx) = setup(100, 50);
    let spec = TargetSpec::new("half").scale(0.5);
    let out = ctx.draw(&Params::new(), spec.clone()).unwrap().texture().unwrap();
    assert_eq!(out.size(), [50, 25]);

    mock.set_drawing_buffer_size(31, 10);
    ctx.draw(&Params::new(), spec).unwrap();
    assert_eq!(out.size(), [16, 5]);
}

#[test]
fn one_character_changes_compile_a_new_program() {
    let (mock, mut ctx) = setup(4, 4);
    ctx.draw(&Params::new().set("FP", "UV, 0.0, 1.0"), Target::Default).unwrap();
    ctx.draw(&Params::new().set("FP", "UV, 0.0, 1.0"), Target::Default).unwrap();
    assert_eq!(ctx.program_count(), 1);
    assert_eq!(mock.count_program_links(), 1);

    ctx.draw(&Params::new().set("FP", "UV, 1.0, 1.0"), Target::Default).unwrap();
    assert_eq!(ctx.program_count(), 2);

    let inc = Params::new().set("Inc", "float k() { return 1.0; }").set("FP", "UV, 1.0, 1.0");
    ctx.draw(&inc, Target::Default).unwrap();
    assert_eq!(ctx.program_count(), 3);
}

#[test]
fn uniform_inference_follows_value_shapes() {
    let (mock, mut ctx) = setup(4, 4);
    let params = Params::new()
        .set("FP", "tint")
        .set("tint", glam::Vec4::new(1.0, 0.0, 0.0, 1.0))
        .set("basis", glam::Mat3::IDENTITY)
        .set("steps", 3);
    ctx.draw(&params, Target::Default).unwrap();
    let source = mock.current_source(ShaderStage::Vertex).unwrap();
    assert!(source.contains("uniform vec4 tint;"));
    assert!(source.contains("uniform mat3 basis;"));
    assert!(source.contains("uniform int steps;"));
    assert_eq!(mock.uniform_value("basis").unwrap().as_f32().len(), 9);
    assert_eq!(mock.uniform_value("steps").unwrap().as_i32(), [3]);
}

#[test]
fn integer_targets_sample_through_isampler() {
    let (mock, mut ctx) = setup(4, 4);
    let labels = ctx
        .draw(&Params::new(), TargetSpec::new("labels").size(2, 2).format("r32i"))
        .unwrap()
        .texture()
        .unwrap();
    ctx.draw(&Params::new().set("FP", "float(labels(I).x)").set("labels", &labels), Target::Default)
        .unwrap();
    let source = mock.current_source(ShaderStage::Fragment).unwrap();
    assert!(source.contains("uniform isampler2D labels;"));
}

#[test]
fn layered_targets_write_every_attachment() {
    let (mock, mut ctx) = setup(4, 4);
    let out = ctx
        .draw(
            &Params::new().set("Clear", [0.25, 0.5, 0.75, 1.0]),
            TargetSpec::new("gbuffer").size(2, 2).format("rgba32f").layers(3),
        )
        .unwrap()
        .texture()
        .unwrap();
    assert!(mock.calls().contains(&GlCall::DrawBuffers { count: 3 }));
    for layer in 0..3 {
        assert_eq!(mock.texel(out.texture(), 1, 1, layer), Some([0.25, 0.5, 0.75, 1.0]));
    }
    assert!(out.sampler().is_layered());
}

#[test]
fn mip_linear_samplers_regenerate_mips_once_per_write() {
    let (mock, mut ctx) = setup(4, 4);
    let src = ctx
        .draw(&Params::new().set("Clear", 1.0), TargetSpec::new("src").size(4, 4))
        .unwrap()
        .texture()
        .unwrap();
    let params = Params::new().set("FP", "img(UV)").set("img", src.sampler().mip_linear());
    ctx.draw(&params, Target::Default).unwrap();
    ctx.draw(&params, Target::Default).unwrap();
    let generated = |mock: &MockGlContext| {
        mock.calls()
            .iter()
            .filter(|c| matches!(c, GlCall::GenerateMipmap { .. }))
            .count()
    };
    assert_eq!(generated(&mock), 1);
    assert!(mock.has_mipmaps(src.texture()));

    ctx.draw(&Params::new().set("Clear", 0.0), &src).unwrap();
    ctx.draw(&params, Target::Default).unwrap();
    assert_eq!(generated(&mock), 2);
}

#[test]
fn async_read_delivers_after_fence_signals() {
    let (mock, mut ctx) = setup(4, 4);
    let out = ctx
        .draw(&Params::new().set("Clear", [0.0, 0.0, 1.0, 1.0]), TargetSpec::new("blue").size(2, 2))
        .unwrap()
        .texture()
        .unwrap();

    mock.set_fence_latency(3);
    let received: Rc<RefCell<Option<PixelData>>> = Rc::default();
    let sink = received.clone();
    out.read(Box::new(move |data| *sink.borrow_mut() = Some(data)), Some([1, 0, 1, 2]), None)
        .unwrap();
    assert_eq!(ctx.pending_readbacks(), 1);
    assert!(received.borrow().is_none());

    let mut delivered = 0;
    for _ in 0..10 {
        delivered += ctx.poll_readbacks();
        if delivered > 0 {
            break;
        }
    }
    assert_eq!(delivered, 1);
    assert_eq!(ctx.pending_readbacks(), 0);
    assert_eq!(
        received.borrow().as_ref(),
        Some(&PixelData::U8(vec![0, 0, 255, 255, 0, 0, 255, 255]))
    );
}

#[test]
fn async_read_into_caller_destination() {
    let (_mock, mut ctx) = setup(4, 4);
    let out = ctx
        .draw(
            &Params::new().set("Clear", 0.5),
            TargetSpec::new("half").size(1, 1).format("r32f"),
        )
        .unwrap()
        .texture()
        .unwrap();
    let received: Rc<RefCell<Vec<f32>>> = Rc::default();
    let sink = received.clone();
    let destination = PixelData::F32(vec![9.0; 4]);
    out.read(
        Box::new(move |data| sink.borrow_mut().extend_from_slice(data.as_f32().unwrap_or(&[]))),
        None,
        Some(destination),
    )
    .unwrap();
    // mock fences signal immediately by default
    assert_eq!(&*received.borrow(), &[0.5, 9.0, 9.0, 9.0]);
    assert_eq!(
        out.read(Box::new(|_| {}), None, Some(PixelData::U8(vec![0; 4]))),
        Err(ReadbackError::InvalidRegion)
    );
}

#[test]
fn reads_in_flight_are_dropped_when_the_target_is_freed() {
    let (mock, mut ctx) = setup(4, 4);
    let out = ctx
        .draw(&Params::new().set("Clear", 1.0), TargetSpec::new("gone").size(2, 2))
        .unwrap()
        .texture()
        .unwrap();
    mock.set_fence_latency(5);
    let called = Rc::new(RefCell::new(false));
    let flag = called.clone();
    out.read(Box::new(move |_| *flag.borrow_mut() = true), None, None)
        .unwrap();
    let fences_deleted = mock.count_fence_deletes();

    ctx.reset();
    for _ in 0..10 {
        ctx.poll_readbacks();
    }
    assert!(!*called.borrow());
    assert_eq!(ctx.pending_readbacks(), 0);
    assert_eq!(mock.count_fence_deletes(), fences_deleted + 1);
    assert_eq!(out.read_sync(None), Err(ReadbackError::Freed));
    assert!(matches!(
        ctx.draw(&Params::new().set("Clear", 0.0), &out),
        Err(DrawError::FreedTarget(tag)) if tag == "gone"
    ));
}

#[test]
fn option_errors_precede_gpu_work() {
    let (mock, mut ctx) = setup(4, 4);
    mock.clear_calls();
    let cases = [
        Params::new().set("FP", "1.0").set("Aspect", "wide"),
        Params::new().set("FP", "1.0").set("Blend", "s+d*zz"),
        Params::new().set("FP", "1.0").set("Grid", [1, 2, 3, 4]),
        Params::new().set("FP", "1.0").set("name", "text"),
    ];
    for params in &cases {
        assert!(ctx.draw(params, TargetSpec::new("t").size(2, 2)).is_err());
    }
    assert_eq!(mock.call_count(), 0);
    assert!(ctx.target("t").is_none());

    let err = ctx
        .draw(&Params::new().set("FP", "1.0"), TargetSpec::new("t").format("rgb12"))
        .unwrap_err();
    assert_eq!(err, DrawError::UnknownFormat("rgb12".into()));
    assert_eq!(ctx.draw(&Params::new(), TargetSpec::new("")).unwrap_err(), DrawError::MissingTag);
}

#[test]
fn oversized_grids_and_meshes_are_rejected() {
    let (mock, mut ctx) = setup(4, 4);
    mock.clear_calls();

    let err = ctx
        .draw(
            &Params::new().set("FP", "1.0").set("Grid", [70000, 70000]),
            TargetSpec::new("g").size(1, 1),
        )
        .unwrap_err();
    assert!(matches!(err, DrawError::InvalidOption { ref name, .. } if name == "Grid"));

    let err = ctx
        .draw(
            &Params::new().set("FP", "1.0").set("Mesh", [100000, 100000]),
            TargetSpec::new("g").size(1, 1),
        )
        .unwrap_err();
    assert!(matches!(err, DrawError::InvalidOption { ref name, .. } if name == "Mesh"));

    assert_eq!(mock.call_count(), 0);
    assert!(ctx.target("g").is_none());
}

#[test]
fn link_failures_are_retried_on_the_next_draw() {
    let (mock, mut ctx) = setup(4, 4);
    mock.fail_next_link("too many varyings");
    let params = Params::new().set("FP", "1.0");
    assert_eq!(
        ctx.draw(&params, Target::Default).unwrap_err(),
        DrawError::ProgramLink {
            log: "too many varyings".into()
        }
    );
    assert_eq!(ctx.program_count(), 0);
    ctx.draw(&params, Target::Default).unwrap();
    assert_eq!(ctx.program_count(), 1);
}

#[test]
fn compile_errors_carry_a_numbered_listing() {
    let (_mock, mut ctx) = setup(4, 4);
    let err = ctx
        .draw(&Params::new().set("FP", "#error nope\n1.0"), Target::Default)
        .unwrap_err();
    let DrawError::ShaderCompile { stage, listing, log } = &err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert_eq!(*stage, ShaderStage::Fragment);
    assert!(listing.starts_with("   1: #version 300 es"));
    assert!(log.contains("nope"));
    assert!(err.to_string().contains("--- GLSL COMPILE ERROR ---"));
}

#[test]
fn explicit_view_limits_the_draw() {
    let (mock, mut ctx) = setup(4, 4);
    mock.register_fragment("0.0, 1.0, 0.0, 1.0", |_| [0.0, 1.0, 0.0, 1.0]);
    let out = ctx
        .draw(
            &Params::new().set("FP", "0.0, 1.0, 0.0, 1.0").set("View", [2, 2]),
            TargetSpec::new("corner").size(4, 4),
        )
        .unwrap()
        .texture()
        .unwrap();
    assert!(mock.calls().contains(&GlCall::Viewport([0, 0, 2, 2])));
    assert_eq!(mock.texel(out.texture(), 1, 1, 0), Some([0.0, 1.0, 0.0, 1.0]));
    assert_eq!(mock.texel(out.texture(), 3, 3, 0), Some([0.0, 0.0, 0.0, 0.0]));
}
