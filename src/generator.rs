//! Beamformer kernel source generator
//!
//! Maps an ([`Observation`], [`TilingConfig`], [`Dtype`]) triple to
//! OpenCL-C source text by building the typed tree from [`crate::ir`]
//! and printing it. Generation is pure and deterministic: identical
//! arguments yield byte-identical text.
//!
//! The emitted kernel is the blocked form. Each work-group owns a
//! `samples_per_group x beams_per_group` tile of the output. Per
//! station iteration the group cooperatively loads the weights for
//! its beams into `__local` storage, synchronizes, and every thread
//! hoists its `samples_per_thread` sample vectors into registers so
//! each shared weight is reused across all of them. A second barrier
//! closes the iteration before the next tile load. At
//! `samples_per_thread = beams_per_thread = 1` the replication ranges
//! collapse and this degenerates to the simple form, shared tile
//! included.
//!
//! Averaging always divides by the unpadded station count; addressing
//! always uses the padded extents. The two are independent axes.

use crate::ir::{
    add, mul, sum, ClType, Dtype, Expr, KernelDef, KernelParam, Lane, Stmt, WorkItem,
};
use crate::observation::{Observation, OutputMode};
use crate::tiling::TilingConfig;

/// Generated kernel source together with its dispatch extents.
///
/// The extents are derived deterministically from the observation and
/// tiling: global covers one thread per (sample, beam) accumulator
/// column, local is the work-group shape.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSource {
    pub name: String,
    pub text: String,
    /// Global work size: (padded samples / samples_per_thread,
    /// beams / beams_per_thread, channels).
    pub global: [usize; 3],
    /// Local work size: (samples_per_block, beams_per_block, 1).
    pub local: [usize; 3],
}

/// Kernel name used for compilation and dispatch.
pub const KERNEL_NAME: &str = "beamformer";

/// Generate the beamformer kernel for one tiling configuration.
///
/// The configuration must have been accepted by the enumerator for
/// this observation; calling this with an infeasible tiling is a
/// contract violation (the emitted extents would not divide the
/// padded dimensions), not a recoverable error.
pub fn generate(obs: &Observation, tiling: &TilingConfig, dtype: Dtype) -> KernelSource {
    let kernel = build_kernel(obs, tiling, dtype);
    let spp = obs.samples_per_padded_second();
    KernelSource {
        name: KERNEL_NAME.to_string(),
        text: kernel.source(),
        global: [
            spp / tiling.samples_per_thread,
            obs.beams() / tiling.beams_per_thread,
            obs.channels(),
        ],
        local: [tiling.samples_per_block, tiling.beams_per_block, 1],
    }
}

fn build_kernel(obs: &Observation, tiling: &TilingConfig, dtype: Dtype) -> KernelDef {
    let vec4 = ClType::Vec4(dtype);
    let spp = obs.samples_per_padded_second();
    let pb = obs.padded_beams();
    let stations = obs.stations();
    let st = tiling.samples_per_thread;
    let bt = tiling.beams_per_thread;
    let sb = tiling.samples_per_block;
    let bb = tiling.beams_per_block;
    let tile_beams = bb * bt;

    let mut body = Vec::new();

    // Per-thread indices.
    body.push(decl_uint("channel", Expr::WorkItem(WorkItem::GroupId(2))));
    body.push(decl_uint(
        "sample",
        add(
            mul(Expr::WorkItem(WorkItem::GroupId(0)), Expr::Uint(sb * st)),
            Expr::WorkItem(WorkItem::LocalId(0)),
        ),
    ));
    body.push(decl_uint(
        "firstBeam",
        mul(Expr::WorkItem(WorkItem::GroupId(1)), Expr::Uint(tile_beams)),
    ));
    body.push(decl_uint(
        "tid",
        add(
            mul(Expr::WorkItem(WorkItem::LocalId(1)), Expr::Uint(sb)),
            Expr::WorkItem(WorkItem::LocalId(0)),
        ),
    ));
    body.push(Stmt::LocalDecl {
        ty: ClType::Float2,
        name: "localWeights".to_string(),
        len: tile_beams,
    });
    body.push(Stmt::Decl {
        ty: ClType::Float2,
        name: "weight".to_string(),
        init: None,
    });

    // One accumulator per (sample, beam) pair held by this thread.
    for i in 0..st {
        for j in 0..bt {
            body.push(Stmt::Decl {
                ty: vec4,
                name: acc_name(i, j),
                init: Some(Expr::VecSplat(vec4, 0.0)),
            });
        }
    }

    body.push(station_loop(tiling, dtype, spp, pb, stations));
    finalize(&mut body, obs, tiling, dtype);

    KernelDef {
        name: KERNEL_NAME.to_string(),
        params: vec![
            KernelParam {
                name: "samples".to_string(),
                ty: vec4,
                read_only: true,
            },
            KernelParam {
                name: "output".to_string(),
                ty: vec4,
                read_only: false,
            },
            KernelParam {
                name: "weights".to_string(),
                ty: ClType::Float2,
                read_only: true,
            },
        ],
        body,
    }
}

/// The station reduction: cooperative tile load, barrier, register
/// hoist of this thread's samples, accumulator updates, barrier.
fn station_loop(
    tiling: &TilingConfig,
    dtype: Dtype,
    spp: usize,
    pb: usize,
    stations: usize,
) -> Stmt {
    let st = tiling.samples_per_thread;
    let bt = tiling.beams_per_thread;
    let sb = tiling.samples_per_block;
    let bb = tiling.beams_per_block;
    let tile_beams = bb * bt;

    let group_threads = sb * bb;
    let mut loop_body = Vec::new();

    // Cooperative tile load: threads stride over the tile in chunks
    // of the group size, so every entry is written even when the tile
    // is wider than the group. A partially loaded tile would silently
    // corrupt every accumulator in the group, hence the bound check
    // on the trailing chunk and the barrier fencing the loads.
    for chunk in 0..tile_beams.div_ceil(group_threads) {
        let base = chunk * group_threads;
        let store = Stmt::Assign {
            target: Expr::index("localWeights", offset("tid", base)),
            value: Expr::index(
                "weights",
                sum([
                    mul(Expr::var("channel"), Expr::Uint(stations * pb)),
                    mul(Expr::var("station"), Expr::Uint(pb)),
                    add(Expr::var("firstBeam"), offset("tid", base)),
                ]),
            ),
        };
        if base + group_threads <= tile_beams {
            loop_body.push(store);
        } else {
            loop_body.push(Stmt::If {
                cond: Expr::Binary(
                    crate::ir::BinOp::Lt,
                    Box::new(offset("tid", base)),
                    Box::new(Expr::Uint(tile_beams)),
                ),
                body: vec![store],
            });
        }
    }
    loop_body.push(Stmt::Barrier);

    // Hoist this thread's samples into registers once per station so
    // every shared weight below is reused across all of them.
    for i in 0..st {
        loop_body.push(Stmt::Decl {
            ty: ClType::Vec4(dtype),
            name: sample_name(i),
            init: Some(Expr::index(
                "samples",
                sum([
                    mul(Expr::var("channel"), Expr::Uint(stations * spp)),
                    mul(Expr::var("station"), Expr::Uint(spp)),
                    offset("sample", i * sb),
                ]),
            )),
        });
    }

    for j in 0..bt {
        loop_body.push(Stmt::Assign {
            target: Expr::var("weight"),
            value: Expr::index(
                "localWeights",
                offset_expr(Expr::WorkItem(WorkItem::LocalId(1)), j * bb),
            ),
        });
        for i in 0..st {
            loop_body.extend(accumulate(&acc_name(i, j), &sample_name(i)));
        }
    }

    loop_body.push(Stmt::Barrier);

    Stmt::For {
        var: "station".to_string(),
        bound: Expr::Uint(stations),
        body: loop_body,
    }
}

/// The four complex multiply-accumulate updates of one accumulator
/// from one sample vector and the `weight` register.
fn accumulate(acc: &str, sample: &str) -> Vec<Stmt> {
    let lane = |name: &str, l: Lane| Expr::var(name).swizzle(l);
    let update = |target: Lane, a: Lane, wa: Lane, b: Lane, wb: Lane, negate: bool| {
        let left = mul(lane(sample, a), lane("weight", wa));
        let right = mul(lane(sample, b), lane("weight", wb));
        Stmt::AddAssign {
            target: lane(acc, target),
            value: if negate {
                crate::ir::sub(left, right)
            } else {
                add(left, right)
            },
        }
    };
    vec![
        update(Lane::X, Lane::X, Lane::X, Lane::Y, Lane::Y, true),
        update(Lane::Y, Lane::X, Lane::Y, Lane::Y, Lane::X, false),
        update(Lane::Z, Lane::Z, Lane::X, Lane::W, Lane::Y, true),
        update(Lane::W, Lane::Z, Lane::Y, Lane::W, Lane::X, false),
    ]
}

/// Average every accumulator by the unpadded station count and store
/// it per the output mode.
fn finalize(body: &mut Vec<Stmt>, obs: &Observation, tiling: &TilingConfig, dtype: Dtype) {
    let spp = obs.samples_per_padded_second();
    let channels = obs.channels();
    let st = tiling.samples_per_thread;
    let bt = tiling.beams_per_thread;
    let sb = tiling.samples_per_block;
    let bb = tiling.beams_per_block;
    let factor = obs.averaging_factor();

    let stokes = matches!(
        obs.output_mode(),
        OutputMode::StokesI | OutputMode::StokesIquv
    );
    if stokes {
        body.push(Stmt::Decl {
            ty: ClType::Vec4(dtype),
            name: "stokes".to_string(),
            init: None,
        });
    }

    for i in 0..st {
        for j in 0..bt {
            let acc = acc_name(i, j);
            body.push(Stmt::MulAssign {
                target: Expr::var(&acc),
                value: Expr::Float(factor),
            });

            let out_index = sum([
                mul(
                    offset_expr(
                        add(Expr::var("firstBeam"), Expr::WorkItem(WorkItem::LocalId(1))),
                        j * bb,
                    ),
                    Expr::Uint(channels * spp),
                ),
                mul(Expr::var("channel"), Expr::Uint(spp)),
                offset("sample", i * sb),
            ]);
            let target = Expr::index("output", out_index);

            let lane = |l: Lane| Expr::var(&acc).swizzle(l);
            let sq = |l: Lane| mul(lane(l), lane(l));
            // |P0|^2 and |P1|^2 of the averaged accumulator.
            let p0 = add(sq(Lane::X), sq(Lane::Y));
            let p1 = add(sq(Lane::Z), sq(Lane::W));

            match obs.output_mode() {
                OutputMode::Raw => body.push(Stmt::Assign {
                    target,
                    value: Expr::var(&acc),
                }),
                OutputMode::StokesI => {
                    body.push(Stmt::Assign {
                        target: Expr::var("stokes").swizzle(Lane::X),
                        value: add(p0, p1),
                    });
                    for l in [Lane::Y, Lane::Z, Lane::W] {
                        body.push(Stmt::Assign {
                            target: Expr::var("stokes").swizzle(l),
                            value: Expr::var("stokes").swizzle(Lane::X),
                        });
                    }
                    body.push(Stmt::Assign {
                        target,
                        value: Expr::var("stokes"),
                    });
                }
                OutputMode::StokesIquv => {
                    body.push(Stmt::Assign {
                        target: Expr::var("stokes").swizzle(Lane::X),
                        value: add(p0.clone(), p1.clone()),
                    });
                    body.push(Stmt::Assign {
                        target: Expr::var("stokes").swizzle(Lane::Y),
                        value: crate::ir::sub(p0, p1),
                    });
                    body.push(Stmt::Assign {
                        target: Expr::var("stokes").swizzle(Lane::Z),
                        value: mul(
                            Expr::Float(2.0),
                            add(
                                mul(lane(Lane::X), lane(Lane::Z)),
                                mul(lane(Lane::Y), lane(Lane::W)),
                            ),
                        ),
                    });
                    body.push(Stmt::Assign {
                        target: Expr::var("stokes").swizzle(Lane::W),
                        value: mul(
                            Expr::Float(2.0),
                            crate::ir::sub(
                                mul(lane(Lane::Y), lane(Lane::Z)),
                                mul(lane(Lane::X), lane(Lane::W)),
                            ),
                        ),
                    });
                    body.push(Stmt::Assign {
                        target,
                        value: Expr::var("stokes"),
                    });
                }
            }
        }
    }
}

fn acc_name(i: usize, j: usize) -> String {
    format!("acc{}_{}", i, j)
}

fn sample_name(i: usize) -> String {
    format!("cSample{}", i)
}

fn decl_uint(name: &str, init: Expr) -> Stmt {
    Stmt::Decl {
        ty: ClType::Uint,
        name: name.to_string(),
        init: Some(init),
    }
}

/// `var` or `(var + step)`; the zero offset of the first replication
/// slot folds away.
fn offset(base: &str, step: usize) -> Expr {
    offset_expr(Expr::var(base), step)
}

fn offset_expr(base: Expr, step: usize) -> Expr {
    if step == 0 {
        base
    } else {
        add(base, Expr::Uint(step))
    }
}

// ============================================================================
// Cost model
// ============================================================================

/// FLOP and byte counts for one kernel dispatch, used to turn elapsed
/// times into GFLOP/s and GB/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCost {
    pub flops: u64,
    pub bytes: u64,
}

impl KernelCost {
    pub fn gflops(&self, seconds: f64) -> f64 {
        self.flops as f64 / 1.0e9 / seconds
    }

    pub fn gbs(&self, seconds: f64) -> f64 {
        self.bytes as f64 / 1.0e9 / seconds
    }

    /// FLOP per byte moved.
    pub fn arithmetic_intensity(&self) -> f64 {
        self.flops as f64 / self.bytes as f64
    }
}

/// Work volume of one dispatch under the shared-tile layout.
///
/// The reduction performs 16 flops per (channel, sample, beam,
/// station): a complex multiply-accumulate on each polarization.
/// Finalization adds 4 flops per output position for Raw (averaging
/// the four lanes), 11 for Stokes I and 24 for Stokes IQUV. Sample
/// vectors are re-read once per beam group; weights are read from
/// global memory once per (sample group, station, tile entry).
pub fn kernel_cost(obs: &Observation, tiling: &TilingConfig) -> KernelCost {
    let channels = obs.channels() as u64;
    let samples = obs.samples_per_second() as u64;
    let beams = obs.beams() as u64;
    let stations = obs.stations() as u64;
    let beam_groups = beams / tiling.beams_per_group() as u64;
    let sample_groups =
        obs.samples_per_padded_second() as u64 / tiling.samples_per_group() as u64;

    let positions = channels * samples * beams;
    let reduce_flops = positions * stations * 16;
    let finalize_flops = positions
        * match obs.output_mode() {
            OutputMode::Raw => 4,
            OutputMode::StokesI => 11,
            OutputMode::StokesIquv => 24,
        };

    let sample_bytes = channels * samples * beam_groups * stations * 16;
    let weight_bytes = channels * sample_groups * beams * stations * 8;
    let output_bytes = positions * 16;

    KernelCost {
        flops: reduce_flops + finalize_flops,
        bytes: sample_bytes + weight_bytes + output_bytes,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::{Configurations, SearchBounds};

    fn obs(mode: OutputMode) -> Observation {
        Observation::new(64, 32, 4, 256, 32, mode).unwrap()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let obs = obs(OutputMode::StokesIquv);
        let tiling = TilingConfig::new(64, 2, 2, 2);
        let a = generate(&obs, &tiling, Dtype::F32);
        let b = generate(&obs, &tiling, Dtype::F32);
        assert_eq!(a.text, b.text);
        assert_eq!(a.global, b.global);
    }

    #[test]
    fn test_dispatch_extents_divide_padded_dimensions() {
        let obs = obs(OutputMode::Raw);
        let bounds = SearchBounds {
            max_threads: 256,
            max_items: 4,
            ..SearchBounds::default()
        };
        for tiling in Configurations::new(&obs, bounds) {
            let source = generate(&obs, &tiling, Dtype::F32);
            for dim in 0..3 {
                assert_eq!(
                    source.global[dim] % source.local[dim],
                    0,
                    "extent mismatch for {}",
                    tiling
                );
            }
            assert_eq!(
                source.global[0] * tiling.samples_per_thread,
                obs.samples_per_padded_second()
            );
            assert_eq!(source.global[1] * tiling.beams_per_thread, obs.beams());
            assert_eq!(source.global[2], obs.channels());
        }
    }

    #[test]
    fn test_replicated_fragments() {
        let obs = obs(OutputMode::Raw);
        let tiling = TilingConfig::new(32, 2, 2, 3);
        let source = generate(&obs, &tiling, Dtype::F32);
        // One accumulator declaration per (sample, beam) pair.
        for i in 0..2 {
            for j in 0..3 {
                assert!(
                    source.text.contains(&format!("float4 acc{}_{} = (float4)(0.0f);", i, j)),
                    "missing accumulator {} {}",
                    i,
                    j
                );
            }
        }
        // Shared tile sized for the group's beams, loaded behind a barrier.
        assert!(source.text.contains("__local float2 localWeights[6];"));
        assert_eq!(source.text.matches("barrier(CLK_LOCAL_MEM_FENCE);").count(), 2);
        // Second replicated sample is strided by the block extent.
        assert!(source.text.contains("(sample + 32)"));
    }

    #[test]
    fn test_tile_load_strides_when_tile_exceeds_group() {
        // A 2-thread group owning 4 beams must write the whole tile,
        // not just the first group_threads entries.
        let obs = Observation::new(4, 8, 1, 64, 2, OutputMode::Raw).unwrap();
        let tiling = TilingConfig::new(2, 1, 1, 4);
        let bounds = SearchBounds {
            min_threads: 2,
            thread_granularity: 1,
            ..SearchBounds::default()
        };
        assert!(tiling.is_feasible(&obs, &bounds));

        let source = generate(&obs, &tiling, Dtype::F32);
        assert!(source.text.contains("__local float2 localWeights[4];"));
        assert!(source.text.contains("localWeights[tid] ="));
        assert!(source.text.contains("localWeights[(tid + 2)] ="));
        // Two exact chunks cover the tile, so no bound check is emitted.
        assert!(!source.text.contains("if ("));
    }

    #[test]
    fn test_tile_load_guards_partial_trailing_chunk() {
        let obs = Observation::new(4, 6, 1, 64, 2, OutputMode::Raw).unwrap();
        let source = generate(&obs, &TilingConfig::new(2, 1, 1, 3), Dtype::F32);
        assert!(source.text.contains("localWeights[tid] ="));
        assert!(source.text.contains("if (((tid + 2) < 3)) {"));
    }

    #[test]
    fn test_degenerate_tiling_is_simple_form() {
        let obs = obs(OutputMode::Raw);
        let tiling = TilingConfig::new(64, 1, 1, 1);
        let source = generate(&obs, &tiling, Dtype::F32);
        // Single accumulator, single hoisted sample, tile still present.
        assert!(source.text.contains("float4 acc0_0"));
        assert!(!source.text.contains("acc0_1"));
        assert!(!source.text.contains("acc1_0"));
        assert!(source.text.contains("__local float2 localWeights[1];"));
    }

    #[test]
    fn test_averaging_uses_unpadded_station_count() {
        // 48 stations with padding 32: factor must be 1/48, not 1/64.
        let obs = Observation::new(48, 2, 1, 64, 32, OutputMode::Raw).unwrap();
        let source = generate(&obs, &TilingConfig::new(32, 1, 1, 1), Dtype::F32);
        assert!(source.text.contains("*= 0.020833"));
    }

    #[test]
    fn test_stokes_i_broadcasts_all_lanes() {
        let obs = obs(OutputMode::StokesI);
        let source = generate(&obs, &TilingConfig::new(32, 1, 1, 1), Dtype::F32);
        assert!(source.text.contains("stokes.y = stokes.x;"));
        assert!(source.text.contains("stokes.w = stokes.x;"));
    }

    #[test]
    fn test_double_precision_element_type() {
        let obs = obs(OutputMode::Raw);
        let source = generate(&obs, &TilingConfig::new(32, 1, 1, 1), Dtype::F64);
        assert!(source.text.contains("__global const double4 * restrict const samples"));
        // Weights stay single precision.
        assert!(source.text.contains("__global const float2 * restrict const weights"));
    }

    #[test]
    fn test_cost_model_mode_ordering() {
        let tiling = TilingConfig::new(32, 1, 1, 1);
        let raw = kernel_cost(&obs(OutputMode::Raw), &tiling);
        let i = kernel_cost(&obs(OutputMode::StokesI), &tiling);
        let iquv = kernel_cost(&obs(OutputMode::StokesIquv), &tiling);
        assert!(raw.flops < i.flops);
        assert!(i.flops < iquv.flops);
        assert!(raw.arithmetic_intensity() > 0.0);
    }

    #[test]
    fn test_wider_beam_tiles_reduce_sample_traffic() {
        let obs = obs(OutputMode::Raw);
        let narrow = kernel_cost(&obs, &TilingConfig::new(32, 1, 1, 1));
        let wide = kernel_cost(&obs, &TilingConfig::new(32, 2, 1, 4));
        assert!(wide.bytes < narrow.bytes);
        assert_eq!(wide.flops, narrow.flops);
    }
}
