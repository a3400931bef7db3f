const OPUS_FMTP_FRAGMENT: &str = "minptime=10;useinbandfec=1";
const STEREO_PARAMS: &str = ";stereo=1;sprop-stereo=1;";

/// Ask the sender for stereo Opus by extending the first Opus fmtp line.
/// SDP without the fragment is returned unchanged.
pub fn force_opus_stereo(sdp: &str) -> String {
    match sdp.find(OPUS_FMTP_FRAGMENT) {
        Some(start) => {
            let end = start + OPUS_FMTP_FRAGMENT.len();
            let mut out = String::with_capacity(sdp.len() + STEREO_PARAMS.len());
            out.push_str(&sdp[..end]);
            out.push_str(STEREO_PARAMS);
            out.push_str(&sdp[end..]);
            out
        }
        None => sdp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "v=0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

    #[test_timeout::timeout]
    fn stereo_params_follow_the_fragment() {
        let fixed = force_opus_stereo(ANSWER);
        assert!(fixed.contains("a=fmtp:111 minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1;\r\n"));
        assert_eq!(fixed.replace(STEREO_PARAMS, ""), ANSWER);
    }

    #[test_timeout::timeout]
    fn only_first_occurrence_is_rewritten() {
        let doubled = format!("{ANSWER}a=fmtp:112 minptime=10;useinbandfec=1\r\n");
        let fixed = force_opus_stereo(&doubled);
        assert_eq!(fixed.matches("stereo=1;sprop-stereo=1;").count(), 1);
        assert!(fixed.ends_with("a=fmtp:112 minptime=10;useinbandfec=1\r\n"));
    }

    #[test_timeout::timeout]
    fn sdp_without_opus_is_untouched() {
        let video_only = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        assert_eq!(force_opus_stereo(video_only), video_only);
    }
}
