//! Pure arbitration rules. The coordinator gathers the inputs (registry
//! snapshot, active tab, mode); these functions only decide.

use duck_proto::config::VolumeConfig;
use duck_proto::mode::Mode;
use duck_proto::sites::Sites;

use crate::registry::TrackedPlaybackState;

/// What the player tabs should be told.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Treatment {
    Volume(f64),
    Playback { pause: bool },
}

pub fn state_indicates_playing(state: &TrackedPlaybackState, sites: &Sites) -> bool {
    state.is_playing && (state.on_target_page || sites.looks_like_video_page(&state.page_url))
}

/// `AnyTab`: some tracked tab, focused or not, is playing a video.
pub fn any_tab_playing<'a, I>(states: I, sites: &Sites) -> bool
where
    I: IntoIterator<Item = &'a TrackedPlaybackState>,
{
    states
        .into_iter()
        .any(|state| state_indicates_playing(state, sites))
}

/// `ActiveTab`: the focused tab is a tracked video page and is playing.
///
/// `state` is the cached (or freshly pulled) state for the active tab under
/// the kind its URL belongs to.
pub fn active_tab_playing(
    active_url: &str,
    state: Option<&TrackedPlaybackState>,
    sites: &Sites,
) -> bool {
    let Some(state) = state else {
        return false;
    };
    state.is_playing && state.on_target_page && sites.looks_like_video_page(active_url)
}

pub fn treatment_for(mode: Mode, video_playing: bool, volume: &VolumeConfig) -> Treatment {
    match mode {
        Mode::Duck => Treatment::Volume(if video_playing {
            volume.reduced
        } else {
            volume.full
        }),
        Mode::Pause => Treatment::Playback {
            pause: video_playing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use duck_proto::config::SitesConfig;
    use duck_proto::protocol::SourceKind;

    const WATCH: &str = "https://www.youtube.com/watch?v=abc";

    fn sites() -> Sites {
        Sites::from_config(&SitesConfig::default()).unwrap()
    }

    fn state(is_playing: bool, on_target_page: bool, url: &str) -> TrackedPlaybackState {
        TrackedPlaybackState {
            source: SourceKind::YouTube,
            tab_id: 1,
            is_playing,
            on_target_page,
            page_url: url.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_playing_needs_a_video_page() {
        let sites = sites();
        assert!(state_indicates_playing(&state(true, true, ""), &sites));
        assert!(state_indicates_playing(&state(true, false, WATCH), &sites));
        assert!(!state_indicates_playing(
            &state(true, false, "https://www.youtube.com/"),
            &sites
        ));
        assert!(!state_indicates_playing(&state(false, true, WATCH), &sites));
    }

    #[test]
    fn test_any_tab() {
        let sites = sites();
        let states = [state(false, true, WATCH), state(true, true, WATCH)];
        assert!(any_tab_playing(states.iter(), &sites));
        assert!(!any_tab_playing(states[..1].iter(), &sites));
        assert!(!any_tab_playing(std::iter::empty(), &sites));
    }

    #[test]
    fn test_active_tab_requires_video_url() {
        let sites = sites();
        let playing = state(true, true, WATCH);
        assert!(active_tab_playing(WATCH, Some(&playing), &sites));
        assert!(!active_tab_playing(
            "https://www.youtube.com/feed",
            Some(&playing),
            &sites
        ));
        assert!(!active_tab_playing(WATCH, None, &sites));
        assert!(!active_tab_playing(WATCH, Some(&state(true, false, WATCH)), &sites));
    }

    #[test]
    fn test_treatments() {
        let volume = VolumeConfig::default();
        assert_eq!(treatment_for(Mode::Duck, true, &volume), Treatment::Volume(0.3));
        assert_eq!(treatment_for(Mode::Duck, false, &volume), Treatment::Volume(1.0));
        assert_eq!(
            treatment_for(Mode::Pause, true, &volume),
            Treatment::Playback { pause: true }
        );
    }
}
