use log::debug;

use crate::error::{Result, RouteError};
use crate::model::pcb::board::{Board, ConnRef};
use crate::model::pcb::track::Track;
use crate::model::primitive::point::Pt25;
use crate::route::astar::{Astar, AstarCosts, AstarResult, RouteSpec, SearchCtl};
use crate::route::grid::NavSpacings;

/// Where `segment_to_point` places the inferred via.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViaLocation {
    Source,
    Target,
    None,
}

impl ViaLocation {
    fn index(self) -> u32 {
        match self {
            ViaLocation::Source => 0,
            ViaLocation::Target => 2,
            ViaLocation::None => 3,
        }
    }
}

fn run_astar(
    board: &mut Board,
    spec: &RouteSpec,
    costs: Option<&AstarCosts>,
    ctl: SearchCtl<'_>,
) -> Result<Option<AstarResult>> {
    let costs = costs.cloned().unwrap_or_else(|| board.costs.clone());
    Astar::new(&mut board.grid, costs).search(spec, ctl)
}

/// Install a freshly searched track on the connection: snap the ends onto
/// the declared endpoints, stitch vias at the remaining layer changes, and
/// finalize the cached length.
pub(crate) fn attach_routed_track(board: &mut Board, x: ConnRef, track: Track) -> Result<()> {
    board.conn_mut(x)?.set_track(track);
    board.force_routed(x)?;
    let end = board.conn(x)?.track(0).end();
    let t = &mut board.conn_mut(x)?.tracks_mut()[0];
    t.autocreate_vias(end)?;
    t.compute_length();
    Ok(())
}

/// Unroute if needed, then search a full route for the connection and
/// rasterize the result. Returns whether the connection is now routed.
pub fn astar_connect(
    board: &mut Board,
    x: ConnRef,
    costs: Option<&AstarCosts>,
    ctl: SearchCtl<'_>,
) -> Result<bool> {
    if board.conn(x)?.locked {
        return Ok(false);
    }
    if board.conn(x)?.has_tracks() {
        board.erase_tracks(x)?;
    }
    let sp = NavSpacings::from_connection(board.conn(x)?);
    board.set_spacings(sp)?;
    let spec = board.route_spec(x)?;
    match run_astar(board, &spec, costs, ctl)? {
        Some(res) => {
            if !res.violations.is_empty() {
                debug!("route for {} has {} violations", board.conn(x)?.name(), res.violations.len());
            }
            attach_routed_track(board, x, res.track)?;
            board.rasterize_tracks(x)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Route between two arbitrary points with the connection's rules and
/// append the result to its track set (merging at shared endpoints).
pub fn astar_to_point(
    board: &mut Board,
    x: ConnRef,
    p0: Pt25,
    p1: Pt25,
    costs: Option<&AstarCosts>,
    ctl: SearchCtl<'_>,
) -> Result<bool> {
    if board.conn(x)?.locked || board.conn(x)?.is_routed() {
        return Ok(false);
    }
    let mut y = board.derive_connection(x, p0, p1)?;
    board.set_spacings(NavSpacings::from_connection(&y))?;
    let spec = board.route_spec_for(&y)?;
    let Some(res) = run_astar(board, &spec, costs, ctl)? else { return Ok(false) };

    let sp = match y.source_pin() {
        Some(r) => Some(board.pin(r)?.clone()),
        None => None,
    };
    let tp = match y.target_pin() {
        Some(r) => Some(board.pin(r)?.clone()),
        None => None,
    };
    y.set_track(res.track);
    y.force_routed(sp.as_ref(), tp.as_ref())?;
    let end = y.track(0).end();
    let t = &mut y.tracks_mut()[0];
    t.autocreate_vias(end)?;
    t.compute_length();

    board.unrasterize_tracks(x)?;
    board.append_track(x, y.pop_track(0))?;
    board.rasterize_tracks(x)?;
    Ok(true)
}

/// Place a direct segment (optionally bent at 45 degrees, with an inferred
/// via) between two points. Kept only if its bare copper overlaps no
/// clearance region.
pub fn segment_to_point(
    board: &mut Board,
    x: ConnRef,
    p0: Pt25,
    p1: Pt25,
    bend_location: f64,
    via: ViaLocation,
) -> Result<bool> {
    if board.conn(x)?.locked || board.conn(x)?.is_routed() {
        return Ok(false);
    }
    let mut y = board.derive_connection(x, p0, p1)?;
    let e = board.grid.geom().edge;
    y.make_direct_track45(crate::model::geom::math::squared(0.25 * e), via.index(), bend_location)?;

    let was_rasterized = board.conn(x)?.is_rasterized_all_or_none()?;
    board.unrasterize_tracks(x)?;
    let area = board.sum_violation_area(&y)?;
    if area > 0.0 {
        debug!("segment placement rejected, violation area {area}");
        if was_rasterized {
            board.rasterize_tracks(x)?;
        }
        return Ok(false);
    }
    board.append_track(x, y.pop_track(0))?;
    board.rasterize_tracks(x)?;
    Ok(true)
}

/// Drop the connection's tracks and their keep-outs.
pub fn unroute(board: &mut Board, x: ConnRef) -> Result<()> {
    if board.conn(x)?.locked {
        return Ok(());
    }
    board.erase_tracks(x)
}

/// Pop the last segment or via from the track ending at `endpoint` and
/// re-rasterize what remains.
pub fn unroute_segment(board: &mut Board, x: ConnRef, endpoint: Pt25) -> Result<bool> {
    if board.conn(x)?.locked {
        return Ok(false);
    }
    let tolerance = board.grid.geom().edge * 0.5;
    let Some(ti) = board.conn(x)?.track_ending_near(endpoint, tolerance) else {
        return Ok(false);
    };
    board.unrasterize_tracks(x)?;
    {
        let conn = board.conn_mut(x)?;
        conn.tracks_mut()[ti].pop_safe();
        if conn.tracks()[ti].is_empty() {
            conn.pop_track(ti);
        }
        conn.set_routed(false);
    }
    if board.conn(x)?.has_tracks() {
        board.rasterize_tracks(x)?;
    }
    Ok(true)
}

/// Validate a track against the net's rules and install it as the
/// connection's only track.
pub fn set_track(board: &mut Board, x: ConnRef, t: Track) -> Result<bool> {
    let v = board.nets[x.net].validate_track(&t, &board.layout_area);
    if !v.ok() {
        return Err(RouteError::Rule { legal_area: v.legal_area, legal_rules: v.legal_rules });
    }
    board.erase_tracks(x)?;
    board.conn_mut(x)?.set_track(t);
    board.check_routed(x)?;
    board.rasterize_tracks(x)?;
    Ok(board.conn(x)?.is_routed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::primitive::{pt, pt25, wseg25};
    use crate::testutil::{empty_board, p25, point_net, unit_rules};

    #[test]
    fn test_segment_to_direct() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(5.5, 0.5, 0))]);
        let (src, dst) = (p25(0.5, 0.5, 0), p25(5.5, 0.5, 0));
        let ok = segment_to_point(&mut board, refs[0], src, dst, 1.0, ViaLocation::None).unwrap();
        assert!(ok);
        let conn = board.conn(refs[0]).unwrap();
        assert!(conn.is_routed());
        assert_eq!(conn.track(0).num_segments(), 1);
    }

    #[test]
    fn test_segment_to_rejects_violation() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let mut refs =
            point_net(&mut board, "A", unit_rules(), &[(p25(0.5, 4.5, 0), p25(9.5, 4.5, 0))]);
        refs.extend(point_net(
            &mut board,
            "B",
            unit_rules(),
            &[(p25(4.5, 0.5, 0), p25(4.5, 9.5, 0))],
        ));
        assert!(astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap());

        // B's direct segment would cross A's copper.
        let (src, dst) = (p25(4.5, 0.5, 0), p25(4.5, 9.5, 0));
        let ok = segment_to_point(&mut board, refs[1], src, dst, 1.0, ViaLocation::None).unwrap();
        assert!(!ok);
        assert!(!board.conn(refs[1]).unwrap().has_tracks());
        // A's keep-outs survived the round trip.
        assert!(board.conn(refs[0]).unwrap().is_rasterized_all_or_none().unwrap());
    }

    #[test]
    fn test_route_to_builds_partial_tracks() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(8.5, 0.5, 0))]);
        let mid = p25(4.5, 0.5, 0);
        assert!(astar_to_point(
            &mut board,
            refs[0],
            p25(0.5, 0.5, 0),
            mid,
            None,
            SearchCtl::default()
        )
        .unwrap());
        assert!(!board.conn(refs[0]).unwrap().is_routed());
        assert_eq!(board.conn(refs[0]).unwrap().num_tracks(), 1);

        assert!(astar_to_point(
            &mut board,
            refs[0],
            mid,
            p25(8.5, 0.5, 0),
            None,
            SearchCtl::default()
        )
        .unwrap());
        let conn = board.conn(refs[0]).unwrap();
        assert!(conn.is_routed());
        assert_eq!(conn.num_tracks(), 1);
        assert!(conn.track(0).has_valid_ends());
    }

    #[test]
    fn test_unroute_segment_pops_last() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(9.5, 0.5, 0))]);
        assert!(astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap());
        let end = board.conn(refs[0]).unwrap().track(0).end();
        assert!(unroute_segment(&mut board, refs[0], end).unwrap());
        let conn = board.conn(refs[0]).unwrap();
        assert!(!conn.is_routed());
        // The single-segment track vanished entirely.
        assert!(!conn.has_tracks());
    }

    #[test]
    fn test_set_track_validates() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(5.5, 0.5, 0))]);

        // Too narrow for the net.
        let mut narrow = Track::new(pt25(0.5, 0.5, 0));
        narrow.set_default_width(0.2);
        narrow.append_seg(wseg25(pt(0.5, 0.5), pt(5.5, 0.5), 0, 0.1)).unwrap();
        match set_track(&mut board, refs[0], narrow) {
            Err(RouteError::Rule { legal_area, legal_rules }) => {
                assert!(legal_area && !legal_rules);
            }
            other => panic!("expected rule error, got {other:?}"),
        }

        let mut good = Track::new(pt25(0.5, 0.5, 0));
        good.set_default_width(1.0);
        good.append_seg(wseg25(pt(0.5, 0.5), pt(5.5, 0.5), 0, 0.5)).unwrap();
        assert!(set_track(&mut board, refs[0], good).unwrap());
        assert!(board.conn(refs[0]).unwrap().is_routed());
    }

    #[test]
    fn test_unroute_is_symmetric() {
        let mut board = empty_board(10.0, 10.0, 1, 1.0);
        let refs =
            point_net(&mut board, "N1", unit_rules(), &[(p25(0.5, 0.5, 0), p25(9.5, 0.5, 0))]);
        // Prime spacings so the snapshot covers the routed state only.
        let sp = crate::route::grid::NavSpacings::from_connection(board.conn(refs[0]).unwrap());
        board.set_spacings(sp).unwrap();
        let before = board.grid.keepout_snapshot();
        assert!(astar_connect(&mut board, refs[0], None, SearchCtl::default()).unwrap());
        unroute(&mut board, refs[0]).unwrap();
        assert_eq!(before, board.grid.keepout_snapshot());
        assert!(!board.conn(refs[0]).unwrap().has_tracks());
    }
}
